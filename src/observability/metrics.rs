//! Reconciliation counters.
//!
//! Recorded through the `metrics` facade; without an installed recorder they are no-ops.

use metrics::{counter, histogram};
use serde::Serialize;

use crate::domain::ResourceKind;

/// Outcome label of a reconciled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
    Failed,
    ForcedFailed,
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
            Outcome::Failed => "failed",
            Outcome::ForcedFailed => "forced_failed",
            Outcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Count one resource reaching `outcome`
    pub fn record_outcome(&self, kind: ResourceKind, outcome: Outcome) {
        let labels = [
            ("kind", kind.as_str().to_string()),
            ("outcome", outcome.as_str().to_string()),
        ];
        counter!("reconcile_resources_total", &labels).increment(1);
    }

    /// Record a dependent forced through post-processing
    pub fn record_forced_attempt(&self, kind: ResourceKind) {
        let labels = [("kind", kind.as_str().to_string())];
        counter!("reconcile_forced_attempts_total", &labels).increment(1);
    }

    /// Record a full apply run
    pub fn record_run(&self, resources: usize, duration_seconds: f64, success: bool) {
        let labels = [("status", if success { "success" } else { "failure" }.to_string())];
        counter!("reconcile_runs_total", &labels).increment(1);
        histogram!("reconcile_run_duration_seconds").record(duration_seconds);
        histogram!("reconcile_run_resources").record(resources as f64);
    }
}
