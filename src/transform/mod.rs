//! Transform rule engine.
//!
//! Maps a reading to the values derived from it. The irrigation rule is a
//! pure function of temperature and humidity; the other transforms only
//! reshape inputs.

use crate::model::{GeoPoint, Reading};
use serde::{Deserialize, Serialize};
use std::fmt;


/// Highest irrigation level.
pub const MAX_LEVEL: u8 = 4;

/// Below this humidity (%) the level is raised by one.
pub const LOW_HUMIDITY: f64 = 40.0;

/// Above this humidity (%) the level is lowered by one.
pub const HIGH_HUMIDITY: f64 = 70.0;

/// Irrigation action chosen from the temperature band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    NoIrrigation,
    MinimumIrrigation,
    NormalIrrigation,
    IntenseIrrigation,
    MaximumIrrigation,
}

/// Leveled irrigation decision derived from one reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub action: Action,
    /// 0 (no irrigation) to [`MAX_LEVEL`]
    pub level: u8,
    pub description: String,
}

/// Temperature band: `<15`, `[15,20)`, `[20,25)`, `[25,30)`, `>=30`.
///
/// Returns the band's action, base level and label. NaN lands in the top
/// band since every lower-band comparison fails.
pub fn base_band(temperature: f64) -> (Action, u8, &'static str) {
    if temperature < 15.0 {
        (Action::NoIrrigation, 0, "Low temperature")
    } else if temperature < 20.0 {
        (Action::MinimumIrrigation, 1, "Moderate-low temperature")
    } else if temperature < 25.0 {
        (Action::NormalIrrigation, 2, "Normal temperature")
    } else if temperature < 30.0 {
        (Action::IntenseIrrigation, 3, "High temperature")
    } else {
        (Action::MaximumIrrigation, 4, "Very high temperature")
    }
}

/// Computes the irrigation decision for a temperature (°C) and humidity (%).
///
/// Humidity only moves a non-zero level: below [`LOW_HUMIDITY`] it goes up
/// one (capped at [`MAX_LEVEL`]), above [`HIGH_HUMIDITY`] it goes down one.
pub fn decide(temperature: f64, humidity: f64) -> DecisionRecord {
    let (action, base_level, label) = base_band(temperature);
    let mut description = format!("{} ({}°C)", label, temperature);

    let level = if humidity < LOW_HUMIDITY && base_level > 0 {
        description.push_str(&format!(", adjusted for low humidity ({}%)", humidity));
        (base_level + 1).min(MAX_LEVEL)
    } else if humidity > HIGH_HUMIDITY && base_level > 0 {
        description.push_str(&format!(", adjusted for high humidity ({}%)", humidity));
        base_level.saturating_sub(1)
    } else {
        description.push_str(&format!(", normal humidity ({}%)", humidity));
        base_level
    };

    DecisionRecord {
        action,
        level,
        description,
    }
}

/// Values derived from a reading by a stream's transform.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Derived {
    pub decision: Option<DecisionRecord>,
    pub location: Option<GeoPoint>,
}

/// Transform errors
#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    /// A value the transform needs is absent (null column or missing row field)
    MissingInput(&'static str),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::MissingInput(name) => {
                write!(f, "reading has no value for '{}'", name)
            }
        }
    }
}

impl std::error::Error for TransformError {}

/// Per-stream transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
    /// Irrigation decision from `temperature_attr` and `humidity_attr`
    IrrigationKpi {
        temperature_attr: &'static str,
        humidity_attr: &'static str,
    },
    /// GeoJSON point from latitude/longitude; no decision
    Location {
        latitude_attr: &'static str,
        longitude_attr: &'static str,
    },
    /// Nothing derived; the raw values are stored as read
    Passthrough,
}

impl Transform {
    pub fn apply(&self, reading: &Reading) -> Result<Derived, TransformError> {
        match *self {
            Transform::IrrigationKpi {
                temperature_attr,
                humidity_attr,
            } => {
                let temperature = require(reading, temperature_attr)?;
                let humidity = require(reading, humidity_attr)?;
                Ok(Derived {
                    decision: Some(decide(temperature, humidity)),
                    location: None,
                })
            }
            Transform::Location {
                latitude_attr,
                longitude_attr,
            } => {
                let latitude = require(reading, latitude_attr)?;
                let longitude = require(reading, longitude_attr)?;
                Ok(Derived {
                    decision: None,
                    location: Some(GeoPoint::new(latitude, longitude)),
                })
            }
            Transform::Passthrough => Ok(Derived::default()),
        }
    }
}

fn require(reading: &Reading, name: &'static str) -> Result<f64, TransformError> {
    reading.value(name).ok_or(TransformError::MissingInput(name))
}
