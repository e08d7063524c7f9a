// Configuration
pub mod config;

// Domain values and the stream catalog
pub mod model;
pub mod stream;

// Transform rules
pub mod transform;

// Storage drivers
pub mod sink;
pub mod source;

// ETL cycle and its scheduling
pub mod pipeline;
pub mod scheduler;

// Context broker client and reconciliation
pub mod broker;

// Readiness and liveness waits
pub mod retry;

// Startup sequence
pub mod orchestrator;

// HTTP API
pub mod api;

#[cfg(test)]
mod testing;
