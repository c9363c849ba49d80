//! Probe records and the observation sets built from them.

use crate::metric::Metric;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Bits in one megabit. Download and upload both use the decimal base.
pub const BITS_PER_MEGABIT: f64 = 1_000_000.0;

/// Throughput in megabits per second for `bytes` moved in `duration`.
///
/// Returns `None` for a zero duration or zero bytes, which cannot describe a
/// real transfer.
pub fn throughput_mbps(bytes: u64, duration: Duration) -> Option<f64> {
    let seconds = duration.as_secs_f64();

    if bytes == 0 || seconds <= 0.0 {
        return None;
    }

    Some(bytes as f64 * 8.0 / seconds / BITS_PER_MEGABIT)
}

/// How a single probe ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Success,
    Failed(String),
    TimedOut,
    Cancelled,
}

/// One timed network attempt.
#[derive(Debug, Clone)]
pub struct Probe {
    pub url: Url,
    pub started_at: Instant,
    pub outcome: ProbeOutcome,
    pub elapsed: Duration,
    /// Payload bytes moved; zero for ping.
    pub bytes: u64,
}

impl Probe {
    pub fn is_success(&self) -> bool {
        self.outcome == ProbeOutcome::Success
    }

    /// The value this probe contributes to an observation set, if any.
    ///
    /// Ping probes yield their round trip in milliseconds; transfer probes
    /// yield throughput in Mbps.
    pub fn observation(&self, metric: Metric) -> Option<f64> {
        if !self.is_success() {
            return None;
        }

        match metric {
            Metric::Ping => Some(self.elapsed.as_secs_f64() * 1000.0),
            Metric::Download | Metric::Upload => {
                throughput_mbps(self.bytes, self.elapsed)
            }
        }
    }

    pub fn ended_at(&self) -> Instant {
        self.started_at + self.elapsed
    }
}

/// Successful observations for one metric in one run.
///
/// Only the sampler appends to a set; everyone else sees it read-only.
#[derive(Debug, Clone)]
pub struct ObservationSet {
    metric: Metric,
    values: Vec<f64>,
    attempts: usize,
    failures: usize,
    last_failure: Option<String>,
    window: Option<(Instant, Instant)>,
}

impl ObservationSet {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            values: Vec::new(),
            attempts: 0,
            failures: 0,
            last_failure: None,
            window: None,
        }
    }

    /// Fold a finished probe into the set.
    pub(crate) fn record(&mut self, probe: &Probe) {
        self.attempts += 1;

        let (first, last) = self
            .window
            .unwrap_or((probe.started_at, probe.ended_at()));
        self.window =
            Some((first.min(probe.started_at), last.max(probe.ended_at())));

        match probe.observation(self.metric) {
            Some(value) => self.values.push(value),
            None => {
                self.failures += 1;
                self.last_failure = match &probe.outcome {
                    ProbeOutcome::Failed(reason) => Some(reason.clone()),
                    ProbeOutcome::TimedOut => Some("request timed out".to_string()),
                    ProbeOutcome::Success => {
                        Some("transfer too small to time".to_string())
                    }
                    ProbeOutcome::Cancelled => self.last_failure.take(),
                };
            }
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Observed values in the order they were folded in.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Why the most recent failed probe failed.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Start of the first probe and end of the last one.
    pub fn window(&self) -> Option<(Instant, Instant)> {
        self.window
    }
}
