//! Values that flow through one ETL cycle.

use crate::transform::DecisionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Latest row read from the time-series store for one stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Time key of the source row (opaque; stored as returned by the source)
    pub source_time: Value,
    /// Numeric columns of the row, keyed by attribute name. Null columns are absent.
    pub values: BTreeMap<String, f64>,
}

impl Reading {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// GeoJSON point (`coordinates` are `[longitude, latitude]`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [longitude, latitude],
        }
    }
}

/// Document appended to the sink once per successful cycle. Never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    /// When this process captured the reading
    pub captured_at: DateTime<Utc>,
    pub source_time: Value,
    pub raw_values: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub stored: bool,
}

impl ResultDocument {
    pub fn new(
        reading: Reading,
        decision: Option<DecisionRecord>,
        location: Option<GeoPoint>,
    ) -> Self {
        Self {
            captured_at: Utc::now(),
            source_time: reading.source_time,
            raw_values: reading.values,
            decision,
            location,
            stored: true,
        }
    }
}

/// A document as read back from the sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    #[serde(flatten)]
    pub document: ResultDocument,
}
