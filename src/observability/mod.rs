//! # Observability Infrastructure
//!
//! Structured logging through `tracing` and reconciliation counters through `metrics`.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::{MetricsRecorder, Outcome};
