//! Run configuration.
//!
//! Values come from built-in defaults, optionally replaced by a JSON config
//! file, then by command-line flags. [`SpeedConfig::validate`] is called
//! before a run starts.

use crate::endpoints::EndpointSource;
use crate::errors::SpeedTestError;
use crate::metric::Metric;
use crate::sampler::SamplingPlan;
use crate::scoring::{
    default_expected_max, default_thresholds, MetricScale, ThresholdTable,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// 2 MiB, generated once per upload measurement.
pub const DEFAULT_UPLOAD_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

const DEFAULT_PING_URL: &str = "https://speed.cloudflare.com/__down?bytes=0";
const DEFAULT_DOWNLOAD_URL: &str =
    "https://speed.cloudflare.com/__down?bytes=10000000";
const DEFAULT_UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";

/// Per-metric settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricConfig {
    /// Endpoints used round-robin.
    pub endpoints: Vec<Url>,
    pub samples: usize,
    /// Value at which the gauge saturates.
    pub expected_max: f64,
    /// Four strictly increasing tier boundaries.
    pub thresholds: [f64; 4],
}

impl MetricConfig {
    fn default_for(metric: Metric, url: &str, samples: usize) -> Self {
        Self {
            endpoints: Url::parse(url).into_iter().collect(),
            samples,
            expected_max: default_expected_max(metric),
            thresholds: default_thresholds(metric),
        }
    }
}

/// Per-metric settings as they appear in a config file. Absent fields keep
/// the metric's built-in values.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MetricOverride {
    endpoints: Option<Vec<Url>>,
    samples: Option<usize>,
    expected_max: Option<f64>,
    thresholds: Option<[f64; 4]>,
}

impl MetricOverride {
    fn apply(self, target: &mut MetricConfig) {
        if let Some(endpoints) = self.endpoints {
            target.endpoints = endpoints;
        }
        if let Some(samples) = self.samples {
            target.samples = samples;
        }
        if let Some(expected_max) = self.expected_max {
            target.expected_max = expected_max;
        }
        if let Some(thresholds) = self.thresholds {
            target.thresholds = thresholds;
        }
    }
}

/// Background load used while sampling loaded latency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadedLatencyConfig {
    pub enabled: bool,
    /// Concurrent download loops saturating the link.
    pub streams: usize,
    /// Ping samples taken under load.
    pub samples: usize,
}

impl Default for LoadedLatencyConfig {
    fn default() -> Self {
        Self { enabled: false, streams: 4, samples: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SpeedConfigFile")]
pub struct SpeedConfig {
    pub ping: MetricConfig,
    pub download: MetricConfig,
    pub upload: MetricConfig,
    /// Order in which metrics are measured.
    pub order: Vec<Metric>,
    pub timeout_ms: u64,
    pub upload_bytes: usize,
    /// Concurrent probes per round for download and upload.
    pub parallel_streams: usize,
    /// Wall-clock limit per metric; unlimited when absent.
    pub duration_budget_ms: Option<u64>,
    pub loaded_latency: LoadedLatencyConfig,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        Self {
            ping: MetricConfig::default_for(Metric::Ping, DEFAULT_PING_URL, 6),
            download: MetricConfig::default_for(
                Metric::Download,
                DEFAULT_DOWNLOAD_URL,
                3,
            ),
            upload: MetricConfig::default_for(
                Metric::Upload,
                DEFAULT_UPLOAD_URL,
                3,
            ),
            order: Metric::ALL.to_vec(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            upload_bytes: DEFAULT_UPLOAD_BYTES,
            parallel_streams: 1,
            duration_budget_ms: None,
            loaded_latency: LoadedLatencyConfig::default(),
        }
    }
}

/// Shape of the JSON config file. Every key is optional and layered over
/// [`SpeedConfig::default`].
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SpeedConfigFile {
    ping: MetricOverride,
    download: MetricOverride,
    upload: MetricOverride,
    order: Option<Vec<Metric>>,
    timeout_ms: Option<u64>,
    upload_bytes: Option<usize>,
    parallel_streams: Option<usize>,
    duration_budget_ms: Option<u64>,
    loaded_latency: Option<LoadedLatencyConfig>,
}

impl From<SpeedConfigFile> for SpeedConfig {
    fn from(file: SpeedConfigFile) -> Self {
        let mut config = SpeedConfig::default();

        file.ping.apply(&mut config.ping);
        file.download.apply(&mut config.download);
        file.upload.apply(&mut config.upload);

        if let Some(order) = file.order {
            config.order = order;
        }
        if let Some(timeout_ms) = file.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(upload_bytes) = file.upload_bytes {
            config.upload_bytes = upload_bytes;
        }
        if let Some(parallel_streams) = file.parallel_streams {
            config.parallel_streams = parallel_streams;
        }
        if file.duration_budget_ms.is_some() {
            config.duration_budget_ms = file.duration_budget_ms;
        }
        if let Some(loaded_latency) = file.loaded_latency {
            config.loaded_latency = loaded_latency;
        }

        config
    }
}

impl SpeedConfig {
    /// Load a JSON config file. Missing keys, at any level, keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, SpeedTestError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SpeedTestError::config(format!(
                "cannot read config file {}",
                path.display()
            ))
            .with_source(e)
        })?;

        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SpeedTestError> {
        serde_json::from_str(text).map_err(|e| {
            SpeedTestError::config(format!("invalid config: {}", e))
                .with_source(e)
        })
    }

    pub fn metric(&self, metric: Metric) -> &MetricConfig {
        match metric {
            Metric::Ping => &self.ping,
            Metric::Download => &self.download,
            Metric::Upload => &self.upload,
        }
    }

    pub fn metric_mut(&mut self, metric: Metric) -> &mut MetricConfig {
        match metric {
            Metric::Ping => &mut self.ping,
            Metric::Download => &mut self.download,
            Metric::Upload => &mut self.upload,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn plan_for(&self, metric: Metric) -> SamplingPlan {
        SamplingPlan::new(self.metric(metric).samples, self.timeout())
            .with_parallel_streams(self.parallel_streams)
            .with_budget(self.duration_budget_ms.map(Duration::from_millis))
            .with_upload_bytes(self.upload_bytes)
    }

    pub fn scale_for(&self, metric: Metric) -> Result<MetricScale, SpeedTestError> {
        let config = self.metric(metric);
        let thresholds = ThresholdTable::new(metric.into(), config.thresholds)
            .map_err(|e| {
                SpeedTestError::config(format!("{} {}", metric, e.message))
            })?;

        Ok(MetricScale::new(config.expected_max, thresholds))
    }

    pub fn endpoints_for(
        &self,
        metric: Metric,
    ) -> Result<EndpointSource, SpeedTestError> {
        EndpointSource::new(self.metric(metric).endpoints.clone()).map_err(
            |_| {
                SpeedTestError::config(format!(
                    "no endpoints configured for {}",
                    metric
                ))
            },
        )
    }

    pub fn validate(&self) -> Result<(), SpeedTestError> {
        if self.order.is_empty() {
            return Err(SpeedTestError::config("metric order must not be empty"));
        }

        let unique: HashSet<_> = self.order.iter().collect();
        if unique.len() != self.order.len() {
            return Err(SpeedTestError::config(
                "metric order must not repeat a metric",
            ));
        }

        for metric in Metric::ALL {
            let config = self.metric(metric);

            if config.endpoints.is_empty() {
                return Err(SpeedTestError::config(format!(
                    "no endpoints configured for {}",
                    metric
                )));
            }
            if !(config.expected_max.is_finite() && config.expected_max > 0.0) {
                return Err(SpeedTestError::config(format!(
                    "{} expected maximum must be positive",
                    metric
                )));
            }

            self.scale_for(metric)?;
            self.plan_for(metric).validate()?;
        }

        if self.loaded_latency.enabled {
            if self.loaded_latency.streams == 0 {
                return Err(SpeedTestError::config(
                    "loaded latency needs at least one load stream",
                ));
            }
            if self.loaded_latency.samples == 0 {
                return Err(SpeedTestError::config(
                    "loaded latency needs at least one ping sample",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SpeedConfig::default();
        assert_eq!(config.ping.samples, 6);
        assert_eq!(config.download.samples, 3);
        assert_eq!(config.upload.samples, 3);
        assert_eq!(config.upload_bytes, 2 * 1024 * 1024);
        assert_eq!(config.timeout(), Duration::from_secs(15));
        assert_eq!(config.order, vec![Metric::Ping, Metric::Download, Metric::Upload]);
        assert_eq!(config.download.expected_max, 300.0);
        assert_eq!(config.ping.endpoints.len(), 1);
        assert!(!config.loaded_latency.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_plan_for_carries_limits() {
        let config = SpeedConfig {
            parallel_streams: 4,
            duration_budget_ms: Some(5_000),
            timeout_ms: 2_000,
            ..SpeedConfig::default()
        };

        let plan = config.plan_for(Metric::Download);
        assert_eq!(plan.samples, 3);
        assert_eq!(plan.parallel_streams, 4);
        assert_eq!(plan.budget, Some(Duration::from_secs(5)));
        assert_eq!(plan.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SpeedConfig::from_json(
            r#"{ "timeout_ms": 3000, "loaded_latency": { "enabled": true } }"#,
        )
        .unwrap();

        assert_eq!(config.timeout_ms, 3000);
        assert!(config.loaded_latency.enabled);
        assert_eq!(config.loaded_latency.streams, 4);
        assert_eq!(config.ping.samples, 6);
    }

    #[test]
    fn test_json_metric_override() {
        let config = SpeedConfig::from_json(
            r#"{
                "upload": {
                    "endpoints": ["https://a.example/up", "https://b.example/up"],
                    "samples": 5,
                    "expected_max": 50.0,
                    "thresholds": [5.0, 10.0, 20.0, 40.0]
                },
                "order": ["download", "upload"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.upload.endpoints.len(), 2);
        assert_eq!(config.order, vec![Metric::Download, Metric::Upload]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_metric_keeps_its_defaults() {
        let config = SpeedConfig::from_json(r#"{ "upload": { "samples": 5 } }"#).unwrap();

        let defaults = SpeedConfig::default();
        assert_eq!(config.upload.samples, 5);
        assert_eq!(config.upload.endpoints, defaults.upload.endpoints);
        assert_eq!(config.upload.thresholds, [10.0, 25.0, 50.0, 100.0]);
        assert_eq!(config.upload.expected_max, 100.0);
        assert_eq!(config.download, defaults.download);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_metric_key_is_rejected() {
        let error =
            SpeedConfig::from_json(r#"{ "ping": { "sample": 5 } }"#).unwrap_err();
        assert_eq!(error.kind, crate::errors::ErrorKind::Config);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let error = SpeedConfig::from_json("{ not json").unwrap_err();
        assert_eq!(error.kind, crate::errors::ErrorKind::Config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SpeedConfig::default();
        config.ping.samples = 0;
        assert!(config.validate().is_err());

        let mut config = SpeedConfig::default();
        config.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SpeedConfig::default();
        config.download.thresholds = [50.0, 20.0, 100.0, 200.0];
        assert!(config.validate().is_err());

        let mut config = SpeedConfig::default();
        config.upload.endpoints.clear();
        assert!(config.validate().is_err());

        let mut config = SpeedConfig::default();
        config.order = vec![Metric::Ping, Metric::Ping];
        assert!(config.validate().is_err());

        let mut config = SpeedConfig::default();
        config.loaded_latency.enabled = true;
        config.loaded_latency.streams = 0;
        assert!(config.validate().is_err());
    }
}
