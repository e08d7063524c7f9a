use super::{SourceError, SourceReader};
use crate::model::Reading;
use crate::stream::StreamKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// CrateDB error code for "relation unknown". The history connector creates
/// a stream's table on its first notification, so this means "no data yet".
const UNKNOWN_TABLE_CODE: i64 = 4041;

/// `POST /_sql` response body.
#[derive(Debug, Deserialize)]
struct SqlResponse {
    #[serde(default)]
    cols: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SqlErrorBody {
    error: SqlError,
}

#[derive(Debug, Deserialize)]
struct SqlError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// Time-series reader over CrateDB's HTTP `_sql` endpoint.
pub struct CrateSource {
    base_url: String,
    http_client: Client,
}

impl CrateSource {
    /// Creates a reader; every request is bounded by `timeout`.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build CrateDB HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Runs one statement. `Ok(None)` when the table does not exist.
    async fn execute(&self, stmt: &str, args: Value) -> Result<Option<SqlResponse>, SourceError> {
        let url = format!("{}/_sql", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "stmt": stmt, "args": args }))
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return match serde_json::from_str::<SqlErrorBody>(&body) {
                Ok(err) if err.error.code == Some(UNKNOWN_TABLE_CODE) => Ok(None),
                Ok(err) => Err(SourceError::Query(format!(
                    "status {}: {}",
                    status, err.error.message
                ))),
                Err(_) => Err(SourceError::Query(format!("status {}: {}", status, body))),
            };
        }

        response
            .json::<SqlResponse>()
            .await
            .map(Some)
            .map_err(|e| SourceError::Query(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl SourceReader for CrateSource {
    async fn fetch_latest(&self, stream: StreamKind) -> Result<Option<Reading>, SourceError> {
        let stmt = format!(
            "SELECT time_index, {} FROM {} WHERE entity_id = ? ORDER BY time_index DESC LIMIT 1",
            stream.attributes().join(", "),
            stream.source_table()
        );

        let response = match self.execute(&stmt, json!([stream.entity_id()])).await? {
            Some(r) => r,
            None => {
                debug!(stream = %stream, table = stream.source_table(), "Source table does not exist yet");
                return Ok(None);
            }
        };

        let row = match response.rows.into_iter().next() {
            Some(row) => row,
            None => return Ok(None),
        };

        Ok(Some(row_to_reading(&response.cols, row)))
    }

    async fn ping(&self) -> Result<(), SourceError> {
        self.execute("SELECT 1", json!([])).await.map(|_| ())
    }
}

/// First column is the time key; the rest are numeric attributes.
fn row_to_reading(cols: &[String], row: Vec<Value>) -> Reading {
    let mut cells = row.into_iter();
    let source_time = cells.next().unwrap_or(Value::Null);
    let values: BTreeMap<String, f64> = cols
        .iter()
        .skip(1)
        .zip(cells)
        .filter_map(|(name, cell)| cell.as_f64().map(|v| (name.clone(), v)))
        .collect();

    Reading {
        source_time,
        values,
    }
}
