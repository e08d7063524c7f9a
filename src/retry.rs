//! Bounded-attempts retry policy and the readiness wait built on it.
//!
//! Used for storage readiness at startup and for the context broker's
//! liveness probe before reconciliation.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed number of attempts with a fixed delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// What startup does when a storage backend never became ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessPolicy {
    /// Log and continue; cycles fail until the backend comes up.
    #[default]
    Proceed,
    /// Refuse to start.
    Abort,
}

/// Polls `probe` until it succeeds or the policy's attempts run out.
///
/// Sleeps `policy.delay` between attempts, never after the last one.
/// Returns `true` as soon as a probe succeeds.
pub async fn wait_until_ready<F, Fut>(label: &str, policy: RetryPolicy, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    info!(target_service = %label, "Waiting for service");

    for attempt in 1..=policy.max_attempts {
        match probe().await {
            Ok(()) => {
                info!(target_service = %label, attempt = attempt, "Service is available");
                return true;
            }
            Err(e) => {
                warn!(
                    target_service = %label,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Service not yet available"
                );
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    warn!(
        target_service = %label,
        max_attempts = policy.max_attempts,
        "Service did not become available"
    );
    false
}
