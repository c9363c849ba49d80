//! Collects observations for one metric by issuing timed probes.
//!
//! A single failed, timed-out or rejected probe only shrinks the
//! observation set; it never aborts the measurement. The only error
//! [`Sampler::measure`] returns is an invalid [`SamplingPlan`].

pub mod timeout;

use crate::endpoints::{with_cache_buster, EndpointSource};
use crate::errors::{ProbeError, SpeedTestError};
use crate::http::requests::upload::random_payload;
use crate::http::{
    read_body, Client, DownloadRequest, PingRequest, UploadRequest,
};
use crate::measurements::{ObservationSet, Probe, ProbeOutcome};
use crate::metric::Metric;
use bytes::Bytes;
use futures::future::join_all;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use timeout::guarded;

/// How many probes to run for a metric and under which limits.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingPlan {
    /// Sequential probes, or rounds of probes in parallel mode.
    pub samples: usize,
    /// Deadline for one probe, including the full body for downloads.
    pub timeout: Duration,
    /// Concurrent probes per round. Ignored for ping.
    pub parallel_streams: usize,
    /// Wall-clock limit for the whole measurement.
    pub budget: Option<Duration>,
    /// Upload payload size in bytes.
    pub upload_bytes: usize,
}

impl SamplingPlan {
    pub fn new(samples: usize, timeout: Duration) -> Self {
        Self {
            samples,
            timeout,
            parallel_streams: 1,
            budget: None,
            upload_bytes: crate::config::DEFAULT_UPLOAD_BYTES,
        }
    }

    pub fn with_parallel_streams(mut self, streams: usize) -> Self {
        self.parallel_streams = streams;
        self
    }

    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_upload_bytes(mut self, bytes: usize) -> Self {
        self.upload_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), SpeedTestError> {
        if self.samples == 0 {
            return Err(SpeedTestError::config("sample count must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(SpeedTestError::config("request timeout must be positive"));
        }
        if self.parallel_streams == 0 {
            return Err(SpeedTestError::config(
                "parallel stream count must be at least 1",
            ));
        }
        if self.budget.is_some_and(|b| b.is_zero()) {
            return Err(SpeedTestError::config("duration budget must be positive"));
        }
        if self.upload_bytes == 0 {
            return Err(SpeedTestError::config("upload payload size must be positive"));
        }

        Ok(())
    }

    fn streams_for(&self, metric: Metric) -> usize {
        if metric.is_throughput() {
            self.parallel_streams
        } else {
            1
        }
    }
}

/// Issues probes and folds their results into observation sets.
#[derive(Debug, Clone)]
pub struct Sampler {
    client: Client,
}

impl Sampler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Run the probes described by `plan` and return whatever succeeded.
    ///
    /// Stops early when the budget is spent or `cancel` fires. An empty set
    /// means the metric could not be measured.
    pub async fn measure(
        &self,
        metric: Metric,
        plan: &SamplingPlan,
        endpoints: &EndpointSource,
        cancel: &CancellationToken,
    ) -> Result<ObservationSet, SpeedTestError> {
        plan.validate()?;

        let streams = plan.streams_for(metric);
        let payload = match metric {
            Metric::Upload => random_payload(plan.upload_bytes),
            Metric::Ping | Metric::Download => Bytes::new(),
        };
        let deadline = plan.budget.map(|budget| Instant::now() + budget);

        info!(
            "Measuring {}: {} rounds x {} streams, timeout {} ms",
            metric,
            plan.samples,
            streams,
            plan.timeout.as_millis()
        );

        let mut set = ObservationSet::new(metric);
        let mut sequence = 0;

        for round in 0..plan.samples {
            if cancel.is_cancelled() {
                debug!("{} sampling cancelled after {} rounds", metric, round);
                break;
            }

            let timeout = match deadline {
                Some(deadline) => {
                    let remaining =
                        deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        debug!(
                            "{} duration budget spent after {} rounds",
                            metric, round
                        );
                        break;
                    }
                    remaining.min(plan.timeout)
                }
                None => plan.timeout,
            };

            let urls: Vec<Url> = (0..streams)
                .map(|offset| with_cache_buster(endpoints.next(), sequence + offset))
                .collect();
            sequence += streams;

            let probes = if streams == 1 {
                vec![self.probe(metric, urls[0].clone(), &payload, timeout, cancel).await]
            } else {
                join_all(urls.into_iter().map(|url| {
                    self.probe(metric, url, &payload, timeout, cancel)
                }))
                .await
            };

            for probe in &probes {
                match &probe.outcome {
                    ProbeOutcome::Success => debug!(
                        "{} round {}/{}: {:.2} ms, {} bytes",
                        metric,
                        round + 1,
                        plan.samples,
                        probe.elapsed.as_secs_f64() * 1000.0,
                        probe.bytes
                    ),
                    ProbeOutcome::Cancelled => {}
                    other => warn!(
                        "{} probe to {} dropped: {:?}",
                        metric, probe.url, other
                    ),
                }
                set.record(probe);
            }
        }

        if set.is_empty() {
            warn!(
                "{}: none of {} attempts succeeded",
                metric,
                set.attempts()
            );
        } else if set.failures() > 0 {
            warn!(
                "{}: {} of {} attempts failed, continuing with {} successful",
                metric,
                set.failures(),
                set.attempts(),
                set.len()
            );
        }

        Ok(set)
    }

    /// Run one probe under `timeout` and `cancel`, never failing.
    pub async fn probe(
        &self,
        metric: Metric,
        url: Url,
        payload: &Bytes,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Probe {
        let started_at = Instant::now();
        let result =
            guarded(self.execute(metric, &url, payload), timeout, cancel).await;
        let elapsed = started_at.elapsed();

        let (outcome, bytes) = match result {
            Ok(bytes) => (ProbeOutcome::Success, bytes),
            Err(ProbeError::Timeout(_)) => (ProbeOutcome::TimedOut, 0),
            Err(ProbeError::Cancelled) => (ProbeOutcome::Cancelled, 0),
            Err(e) => (ProbeOutcome::Failed(e.to_string()), 0),
        };

        Probe { url, started_at, outcome, elapsed, bytes }
    }

    async fn execute(
        &self,
        metric: Metric,
        url: &Url,
        payload: &Bytes,
    ) -> Result<u64, ProbeError> {
        match metric {
            Metric::Ping => {
                self.client.send(PingRequest { url: url.clone() }).await?;
                Ok(0)
            }
            Metric::Download => {
                let response =
                    self.client.send(DownloadRequest { url: url.clone() }).await?;
                match read_body(response, |_| {}).await? {
                    0 => Err(ProbeError::EmptyBody),
                    bytes => Ok(bytes),
                }
            }
            Metric::Upload => {
                let request = UploadRequest::new(url.clone(), payload.clone());
                self.client.send(&request).await?;
                Ok(request.bytes())
            }
        }
    }
}
