//! Catalog of the logical sensor streams.
//!
//! Each variant carries everything that differs between streams: where its
//! readings live in the time-series store, which document collection its
//! results go to, how it is transformed, and the subscription and entity
//! the context broker must hold for it.

use crate::broker::{Attribute, EntitySpec, SubscriptionSpec};
use crate::transform::Transform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata requested on every notification.
const NOTIFY_METADATA: [&str; 2] = ["dateCreated", "dateModified"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Temperature/humidity sensor feeding the irrigation KPI
    TempHumidity,
    /// GPS position sensor
    Gps,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::TempHumidity, StreamKind::Gps];

    /// Stream identifier used in logs, status keys and HTTP routes.
    pub fn id(self) -> &'static str {
        match self {
            StreamKind::TempHumidity => "irrigation",
            StreamKind::Gps => "gps",
        }
    }

    pub fn entity_id(self) -> &'static str {
        match self {
            StreamKind::TempHumidity => "sensor001",
            StreamKind::Gps => "sensor002",
        }
    }

    pub fn entity_type(self) -> &'static str {
        match self {
            StreamKind::TempHumidity => "sensorTempHum",
            StreamKind::Gps => "sensorGPS",
        }
    }

    /// Time-series table the broker's history connector writes to.
    pub fn source_table(self) -> &'static str {
        match self {
            StreamKind::TempHumidity => "etsensortemphum",
            StreamKind::Gps => "etsensorgps",
        }
    }

    /// Attribute columns read per cycle (also the watched attributes).
    pub fn attributes(self) -> &'static [&'static str] {
        match self {
            StreamKind::TempHumidity => &["temperatura", "humedad"],
            StreamKind::Gps => &["latitud", "longitud"],
        }
    }

    /// Document collection results are appended to.
    pub fn collection(self) -> &'static str {
        match self {
            StreamKind::TempHumidity => "irrigation_kpi",
            StreamKind::Gps => "location_history",
        }
    }

    pub fn transform(self) -> Transform {
        match self {
            StreamKind::TempHumidity => Transform::IrrigationKpi {
                temperature_attr: "temperatura",
                humidity_attr: "humedad",
            },
            StreamKind::Gps => Transform::Location {
                latitude_attr: "latitud",
                longitude_attr: "longitud",
            },
        }
    }

    pub fn subscription_spec(self, notify_url: &str) -> SubscriptionSpec {
        let description = match self {
            StreamKind::TempHumidity => "Notify temperature and humidity sensor",
            StreamKind::Gps => "Notify GPS sensor",
        };
        let watched: Vec<String> = self.attributes().iter().map(|a| a.to_string()).collect();
        let mut notify_attributes = vec!["id".to_string()];
        notify_attributes.extend(watched.iter().cloned());

        SubscriptionSpec {
            description: description.to_string(),
            entity_type: self.entity_type().to_string(),
            id_pattern: ".*".to_string(),
            watched_attributes: watched,
            notify_url: notify_url.to_string(),
            notify_attributes,
            metadata: NOTIFY_METADATA.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn entity_spec(self) -> EntitySpec {
        let initial: [(&str, f64); 2] = match self {
            StreamKind::TempHumidity => [("temperatura", 25.1), ("humedad", 58.5)],
            StreamKind::Gps => [("latitud", 6.26195), ("longitud", -75.59046)],
        };
        EntitySpec {
            id: self.entity_id().to_string(),
            entity_type: self.entity_type().to_string(),
            attributes: initial
                .iter()
                .map(|(name, value)| (name.to_string(), Attribute::float(*value)))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Subscriptions and entities the broker must hold.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    pub subscriptions: Vec<SubscriptionSpec>,
    pub entities: Vec<EntitySpec>,
}

impl DesiredState {
    /// One subscription and one entity per stream.
    pub fn for_streams(streams: &[StreamKind], notify_url: &str) -> Self {
        Self {
            subscriptions: streams
                .iter()
                .map(|s| s.subscription_spec(notify_url))
                .collect(),
            entities: streams.iter().map(|s| s.entity_spec()).collect(),
        }
    }
}
