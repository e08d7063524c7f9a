pub mod env;
pub use env::{apply_env_overrides, apply_overrides};

use crate::retry::{ReadinessPolicy, RetryPolicy};
use crate::stream::StreamKind;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete ETL service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EtlConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl EtlConfig {
    /// Fixed cadence for a stream's scheduled cycles.
    pub fn interval_for(&self, stream: StreamKind) -> Duration {
        let secs = match stream {
            StreamKind::TempHumidity => self.schedule.irrigation_interval_secs,
            StreamKind::Gps => self.schedule.gps_interval_secs,
        };
        Duration::from_secs(secs)
    }

    /// Rejects zero intervals and timeouts.
    ///
    /// A zero interval would poll the source back-to-back; a zero timeout
    /// would fail every outbound request.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("source.timeout_secs", self.source.timeout_secs),
            ("broker.timeout_secs", self.broker.timeout_secs),
            ("broker.liveness_timeout_secs", self.broker.liveness_timeout_secs),
            ("schedule.irrigation_interval_secs", self.schedule.irrigation_interval_secs),
            ("schedule.gps_interval_secs", self.schedule.gps_interval_secs),
        ];
        for (key, value) in required {
            if value == 0 {
                bail!("{} must be greater than zero", key);
            }
        }
        Ok(())
    }
}

/// Time-series store (CrateDB) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,
    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_source_url() -> String {
    "http://crate-db:4200".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// SQLite database file holding result documents
    #[serde(default = "default_sink_path")]
    pub path: PathBuf,
}

fn default_sink_path() -> PathBuf {
    PathBuf::from("etl-documents.db")
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: default_sink_path(),
        }
    }
}

/// Context broker (Orion) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Value of the `Fiware-Service` tenant header
    #[serde(default = "default_fiware_service")]
    pub service: String,
    /// Value of the `Fiware-ServicePath` header
    #[serde(default = "default_fiware_service_path")]
    pub service_path: String,
    /// Where the broker delivers subscription notifications
    #[serde(default = "default_notify_url")]
    pub notify_url: String,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// Timeout for a single liveness probe (seconds)
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub liveness_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub liveness_delay_secs: u64,
}

fn default_broker_url() -> String {
    "http://orion:1026".to_string()
}

fn default_fiware_service() -> String {
    "smart".to_string()
}

fn default_fiware_service_path() -> String {
    "/".to_string()
}

fn default_notify_url() -> String {
    "http://quantumleap:8668/v2/notify".to_string()
}

fn default_liveness_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    10
}

impl BrokerConfig {
    pub fn liveness_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.liveness_attempts,
            Duration::from_secs(self.liveness_delay_secs),
        )
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            service: default_fiware_service(),
            service_path: default_fiware_service_path(),
            notify_url: default_notify_url(),
            timeout_secs: default_request_timeout(),
            liveness_timeout_secs: default_liveness_timeout(),
            liveness_attempts: default_max_attempts(),
            liveness_delay_secs: default_retry_delay(),
        }
    }
}

/// Storage readiness wait at startup
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    /// What to do when a backend never becomes ready
    #[serde(default)]
    pub policy: ReadinessPolicy,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
}

impl ReadinessConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.delay_secs))
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            policy: ReadinessPolicy::default(),
            max_attempts: default_max_attempts(),
            delay_secs: default_retry_delay(),
        }
    }
}

/// Per-stream cycle cadence
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_irrigation_interval")]
    pub irrigation_interval_secs: u64,
    #[serde(default = "default_gps_interval")]
    pub gps_interval_secs: u64,
}

fn default_irrigation_interval() -> u64 {
    300
}

fn default_gps_interval() -> u64 {
    60
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            irrigation_interval_secs: default_irrigation_interval(),
            gps_interval_secs: default_gps_interval(),
        }
    }
}

/// HTTP surface configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Sensor gateway. Routes are mounted only when a token is set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub token: Option<String>,
}

/// Load configuration from a TOML file.
///
/// A missing file is not an error: the service runs on defaults plus
/// environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EtlConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(EtlConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: EtlConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}
