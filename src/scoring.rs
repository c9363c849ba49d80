//! Quality tiers and gauge normalization.
//!
//! A measured value is classified by an ordered threshold table into one of
//! five tiers, and normalized into a gauge whose fill always grows as the
//! connection gets better, whatever the metric's direction.

use crate::errors::SpeedTestError;
use crate::metric::Metric;
use serde::Serialize;
use std::fmt;

/// Sweep of the rendered gauge, in degrees.
pub const GAUGE_SWEEP_DEGREES: f64 = 270.0;

/// Discrete quality label for a measured value.
///
/// Variants are ordered from worst to best so the derived `Ord` compares
/// goodness. `Unmeasured` sorts below every real tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Unmeasured,
    Poor,
    Fair,
    Good,
    VeryGood,
    Excellent,
}

impl QualityTier {
    pub fn description(&self) -> &'static str {
        match self {
            QualityTier::Unmeasured => "Unmeasured",
            QualityTier::Poor => "Poor",
            QualityTier::Fair => "Fair",
            QualityTier::Good => "Good",
            QualityTier::VeryGood => "Very good",
            QualityTier::Excellent => "Excellent",
        }
    }

    pub fn is_measured(&self) -> bool {
        *self != QualityTier::Unmeasured
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Which end of the scale is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

impl From<Metric> for Direction {
    fn from(metric: Metric) -> Self {
        if metric.lower_is_better() {
            Direction::LowerIsBetter
        } else {
            Direction::HigherIsBetter
        }
    }
}

/// Four strictly increasing boundaries splitting the value axis into the
/// five measured tiers.
///
/// For [`Direction::HigherIsBetter`] a value at or above the last boundary
/// is `Excellent`; for [`Direction::LowerIsBetter`] a value at or below the
/// first boundary is `Excellent`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdTable {
    direction: Direction,
    bounds: [f64; 4],
}

impl ThresholdTable {
    pub fn new(
        direction: Direction,
        bounds: [f64; 4],
    ) -> Result<Self, SpeedTestError> {
        let finite = bounds.iter().all(|b| b.is_finite() && *b >= 0.0);
        let increasing = bounds.windows(2).all(|pair| pair[0] < pair[1]);

        if !finite || !increasing {
            return Err(SpeedTestError::config(format!(
                "tier thresholds must be non-negative and strictly increasing, got {:?}",
                bounds
            )));
        }

        Ok(Self { direction, bounds })
    }

    /// Built-in table for a metric.
    pub fn default_for(metric: Metric) -> Self {
        Self { direction: metric.into(), bounds: default_thresholds(metric) }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn bounds(&self) -> [f64; 4] {
        self.bounds
    }

    /// Classify a value. `None`, negative and non-finite values are
    /// `Unmeasured`.
    pub fn tier(&self, value: Option<f64>) -> QualityTier {
        let Some(value) = value.filter(|v| v.is_finite() && *v >= 0.0) else {
            return QualityTier::Unmeasured;
        };

        let [t1, t2, t3, t4] = self.bounds;

        match self.direction {
            Direction::HigherIsBetter => {
                if value >= t4 {
                    QualityTier::Excellent
                } else if value >= t3 {
                    QualityTier::VeryGood
                } else if value >= t2 {
                    QualityTier::Good
                } else if value >= t1 {
                    QualityTier::Fair
                } else {
                    QualityTier::Poor
                }
            }
            Direction::LowerIsBetter => {
                if value <= t1 {
                    QualityTier::Excellent
                } else if value <= t2 {
                    QualityTier::VeryGood
                } else if value <= t3 {
                    QualityTier::Good
                } else if value <= t4 {
                    QualityTier::Fair
                } else {
                    QualityTier::Poor
                }
            }
        }
    }
}

/// Tier boundaries used when the config does not override them.
pub fn default_thresholds(metric: Metric) -> [f64; 4] {
    match metric {
        Metric::Ping => [20.0, 40.0, 70.0, 120.0],
        Metric::Download => [20.0, 50.0, 100.0, 200.0],
        Metric::Upload => [10.0, 25.0, 50.0, 100.0],
    }
}

/// Value at which the gauge reads full (or empty, for ping).
pub fn default_expected_max(metric: Metric) -> f64 {
    match metric {
        Metric::Ping => 200.0,
        Metric::Download => 300.0,
        Metric::Upload => 100.0,
    }
}

/// Normalized gauge position. More fill always means a better connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gauge {
    /// Fill ratio in `[0, 1]`.
    pub ratio: f64,
    /// Fill angle in `[0, GAUGE_SWEEP_DEGREES]`.
    pub angle_deg: f64,
}

impl Gauge {
    pub const EMPTY: Gauge = Gauge { ratio: 0.0, angle_deg: 0.0 };

    pub fn new(value: f64, expected_max: f64, direction: Direction) -> Self {
        if !value.is_finite() || !expected_max.is_finite() || expected_max <= 0.0
        {
            return Self::EMPTY;
        }

        let raw = (value / expected_max).clamp(0.0, 1.0);
        let ratio = match direction {
            Direction::HigherIsBetter => raw,
            Direction::LowerIsBetter => 1.0 - raw,
        };

        Self { ratio, angle_deg: ratio * GAUGE_SWEEP_DEGREES }
    }
}

/// Everything needed to turn a median into a tier and a gauge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricScale {
    pub expected_max: f64,
    pub thresholds: ThresholdTable,
}

impl MetricScale {
    pub fn new(expected_max: f64, thresholds: ThresholdTable) -> Self {
        Self { expected_max, thresholds }
    }

    pub fn default_for(metric: Metric) -> Self {
        Self {
            expected_max: default_expected_max(metric),
            thresholds: ThresholdTable::default_for(metric),
        }
    }

    pub fn gauge(&self, value: Option<f64>) -> Gauge {
        value
            .map(|v| Gauge::new(v, self.expected_max, self.thresholds.direction()))
            .unwrap_or(Gauge::EMPTY)
    }

    pub fn tier(&self, value: Option<f64>) -> QualityTier {
        self.thresholds.tier(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quality_tier_ordering() {
        assert!(QualityTier::Excellent > QualityTier::VeryGood);
        assert!(QualityTier::VeryGood > QualityTier::Good);
        assert!(QualityTier::Good > QualityTier::Fair);
        assert!(QualityTier::Fair > QualityTier::Poor);
        assert!(QualityTier::Poor > QualityTier::Unmeasured);
    }

    #[test]
    fn test_download_tiers() {
        let table = ThresholdTable::default_for(Metric::Download);
        assert_eq!(table.tier(Some(5.0)), QualityTier::Poor);
        assert_eq!(table.tier(Some(20.0)), QualityTier::Fair);
        assert_eq!(table.tier(Some(75.0)), QualityTier::Good);
        assert_eq!(table.tier(Some(150.0)), QualityTier::VeryGood);
        assert_eq!(table.tier(Some(200.0)), QualityTier::Excellent);
        assert_eq!(table.tier(Some(950.0)), QualityTier::Excellent);
    }

    #[test]
    fn test_ping_tiers_are_inverted() {
        let table = ThresholdTable::default_for(Metric::Ping);
        assert_eq!(table.tier(Some(8.0)), QualityTier::Excellent);
        assert_eq!(table.tier(Some(20.0)), QualityTier::Excellent);
        assert_eq!(table.tier(Some(35.0)), QualityTier::VeryGood);
        assert_eq!(table.tier(Some(60.0)), QualityTier::Good);
        assert_eq!(table.tier(Some(100.0)), QualityTier::Fair);
        assert_eq!(table.tier(Some(400.0)), QualityTier::Poor);
    }

    #[test]
    fn test_unmeasured_sentinel() {
        let table = ThresholdTable::default_for(Metric::Upload);
        assert_eq!(table.tier(None), QualityTier::Unmeasured);
        assert_eq!(table.tier(Some(f64::NAN)), QualityTier::Unmeasured);
        assert_eq!(table.tier(Some(-1.0)), QualityTier::Unmeasured);
    }

    #[test]
    fn test_threshold_table_rejects_non_monotonic() {
        let result =
            ThresholdTable::new(Direction::HigherIsBetter, [10.0, 5.0, 20.0, 30.0]);
        assert!(result.is_err());

        let result =
            ThresholdTable::new(Direction::HigherIsBetter, [10.0, 10.0, 20.0, 30.0]);
        assert!(result.is_err());

        let result = ThresholdTable::new(
            Direction::LowerIsBetter,
            [1.0, 2.0, f64::INFINITY, 4.0],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_gauge_clamps() {
        let gauge = Gauge::new(600.0, 300.0, Direction::HigherIsBetter);
        assert_eq!(gauge.ratio, 1.0);
        assert_eq!(gauge.angle_deg, GAUGE_SWEEP_DEGREES);

        let gauge = Gauge::new(150.0, 300.0, Direction::HigherIsBetter);
        assert!((gauge.ratio - 0.5).abs() < 1e-9);
        assert!((gauge.angle_deg - 135.0).abs() < 1e-9);
    }

    #[test]
    fn test_gauge_inverts_for_latency() {
        let fast = Gauge::new(20.0, 200.0, Direction::LowerIsBetter);
        let slow = Gauge::new(180.0, 200.0, Direction::LowerIsBetter);
        assert!(fast.ratio > slow.ratio);
        assert!((fast.ratio - 0.9).abs() < 1e-9);

        let off_scale = Gauge::new(500.0, 200.0, Direction::LowerIsBetter);
        assert_eq!(off_scale.ratio, 0.0);
    }

    #[test]
    fn test_gauge_degenerate_inputs() {
        assert_eq!(Gauge::new(f64::NAN, 100.0, Direction::HigherIsBetter), Gauge::EMPTY);
        assert_eq!(Gauge::new(50.0, 0.0, Direction::HigherIsBetter), Gauge::EMPTY);
        assert_eq!(MetricScale::default_for(Metric::Ping).gauge(None), Gauge::EMPTY);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// A larger throughput never lands in a worse tier.
        #[test]
        fn higher_throughput_never_decreases_tier(
            a in 0.0f64..1000.0,
            b in 0.0f64..1000.0,
        ) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            for metric in [Metric::Download, Metric::Upload] {
                let table = ThresholdTable::default_for(metric);
                prop_assert!(table.tier(Some(low)) <= table.tier(Some(high)));
            }
        }

        /// A larger latency never lands in a better tier.
        #[test]
        fn higher_latency_never_improves_tier(
            a in 0.0f64..1000.0,
            b in 0.0f64..1000.0,
        ) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let table = ThresholdTable::default_for(Metric::Ping);
            prop_assert!(table.tier(Some(low)) >= table.tier(Some(high)));
        }

        /// Every non-negative value falls into exactly one measured tier.
        #[test]
        fn every_value_is_classified(value in 0.0f64..100_000.0) {
            for metric in Metric::ALL {
                let tier = ThresholdTable::default_for(metric).tier(Some(value));
                prop_assert!(tier.is_measured());
            }
        }

        /// Gauge fill is bounded and moves with goodness.
        #[test]
        fn gauge_is_bounded(value in -100.0f64..2000.0) {
            for metric in Metric::ALL {
                let gauge = MetricScale::default_for(metric).gauge(Some(value));
                prop_assert!((0.0..=1.0).contains(&gauge.ratio));
                prop_assert!((0.0..=GAUGE_SWEEP_DEGREES).contains(&gauge.angle_deg));
            }
        }
    }
}
