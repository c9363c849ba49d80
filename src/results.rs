//! Result data structures for a finished run.
//!
//! Everything here implements `Serialize` so the CLI can print a report as
//! JSON.

use crate::aggregator::MetricResult;
use crate::errors::{exit_codes, ErrorKind, SpeedTestError};
use crate::metric::Metric;
use crate::orchestrator::load::LoadWindow;
use crate::presenter::RunStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a run ended, judged by how many requested metrics were measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every requested metric was measured.
    Success,
    /// At least one, but not every, metric was measured.
    Partial,
    /// Nothing was measured, or the run stopped on an error.
    Failed,
    /// The run was cancelled and its partial observations discarded.
    Cancelled,
}

impl RunOutcome {
    pub fn classify(measured: usize, requested: usize) -> Self {
        if measured == 0 {
            RunOutcome::Failed
        } else if measured >= requested {
            RunOutcome::Success
        } else {
            RunOutcome::Partial
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Success => RunStatus::Success,
            RunOutcome::Partial => RunStatus::Partial,
            RunOutcome::Failed => RunStatus::Error,
            RunOutcome::Cancelled => RunStatus::Idle,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RunOutcome::Success => "Speed test completed successfully.",
            RunOutcome::Partial => {
                "Speed test partially completed. Some measurements failed, \
                 usually because an endpoint rejected or blocked the request."
            }
            RunOutcome::Failed => {
                "No measurement succeeded. Check your internet connection and \
                 the configured endpoints, then try again."
            }
            RunOutcome::Cancelled => "Speed test cancelled.",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => exit_codes::SUCCESS,
            RunOutcome::Partial => exit_codes::PARTIAL_FAILURE,
            RunOutcome::Failed => exit_codes::NETWORK_ERROR,
            RunOutcome::Cancelled => exit_codes::CANCELLED,
        }
    }
}

/// Why one metric ended up unmeasured.
#[derive(Debug, Clone, Serialize)]
pub struct MetricFailure {
    pub metric: Metric,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl MetricFailure {
    pub fn new(metric: Metric, error: SpeedTestError) -> Self {
        Self {
            metric,
            kind: error.kind,
            message: error.message,
            suggestion: error.suggestion,
        }
    }
}

/// Latency measured while background downloads saturate the link.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedLatencyResult {
    /// Median ping under load; `None` if no sample succeeded.
    pub ping: Option<MetricResult>,
    /// Loaded median minus idle median, when both exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_latency_ms: Option<f64>,
    pub load_streams: usize,
    /// Background downloads that finished while the load ran.
    pub background_requests: usize,
    pub background_bytes: u64,
    /// Whether background load was running for the whole sampling window.
    pub load_covered_sampling: bool,
    #[serde(skip)]
    pub window: LoadWindow,
}

/// Complete results of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub status: RunStatus,
    pub message: String,
    /// One entry per measured metric, in measurement order.
    pub results: Vec<MetricResult>,
    pub unmeasured: Vec<Metric>,
    /// One entry per metric that ran but produced no observation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<MetricFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_latency: Option<LoadedLatencyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(
        outcome: RunOutcome,
        results: Vec<MetricResult>,
        unmeasured: Vec<Metric>,
        failures: Vec<MetricFailure>,
        loaded_latency: Option<LoadedLatencyResult>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome,
            status: outcome.status(),
            message: outcome.message().to_string(),
            results,
            unmeasured,
            failures,
            loaded_latency,
            error,
        }
    }

    pub fn result(&self, metric: Metric) -> Option<&MetricResult> {
        self.results.iter().find(|result| result.metric == metric)
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}
