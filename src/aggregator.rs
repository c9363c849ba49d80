use crate::measurements::ObservationSet;
use crate::metric::Metric;
use crate::scoring::{Gauge, MetricScale, QualityTier};
use crate::stats::{jitter, median};
use serde::Serialize;

/// The representative value of one metric in one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub metric: Metric,
    /// Median of the observations.
    pub value: f64,
    pub unit: &'static str,
    pub tier: QualityTier,
    pub gauge: Gauge,
    /// Observations the median was taken over.
    pub samples: usize,
    /// Probes attempted, successful or not.
    pub attempts: usize,
    /// Mean absolute difference of consecutive samples; ping only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

/// Reduce an observation set to its median, tier and gauge.
///
/// An empty set has no result: the metric is reported as unmeasured rather
/// than as zero.
pub fn reduce(
    observations: &ObservationSet,
    scale: &MetricScale,
) -> Option<MetricResult> {
    let metric = observations.metric();
    let value = median(observations.values())?;

    let jitter = match metric {
        Metric::Ping => jitter(observations.values()),
        Metric::Download | Metric::Upload => None,
    };

    Some(MetricResult {
        metric,
        value,
        unit: metric.unit(),
        tier: scale.tier(Some(value)),
        gauge: scale.gauge(Some(value)),
        samples: observations.len(),
        attempts: observations.attempts(),
        jitter,
    })
}
