//! Sequences a whole speed test run.
//!
//! The [`Orchestrator`] owns the run-state flag, the cancellation token of
//! the active run and the endpoint rotation for every metric. The rotation
//! outlives individual runs, so repeated runs spread across servers.

pub mod load;

use crate::aggregator::{reduce, MetricResult};
use crate::config::SpeedConfig;
use crate::endpoints::EndpointSource;
use crate::errors::SpeedTestError;
use crate::http::Client;
use crate::measurements::ObservationSet;
use crate::metric::Metric;
use crate::presenter::{Presenter, RunStatus};
use crate::results::{LoadedLatencyResult, MetricFailure, RunOutcome, RunReport};
use crate::sampler::{Sampler, SamplingPlan};
use crate::scoring::{Gauge, MetricScale, QualityTier};
use load::{LoadGenerator, LoadWindow};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Endpoints and scoring for one metric, built once from the config.
#[derive(Debug)]
struct MetricSlot {
    endpoints: EndpointSource,
    scale: MetricScale,
}

impl MetricSlot {
    fn from_config(
        config: &SpeedConfig,
        metric: Metric,
    ) -> Result<Self, SpeedTestError> {
        Ok(Self {
            endpoints: config.endpoints_for(metric)?,
            scale: config.scale_for(metric)?,
        })
    }
}

pub struct Orchestrator {
    config: SpeedConfig,
    client: Client,
    sampler: Sampler,
    ping: MetricSlot,
    download: MetricSlot,
    upload: MetricSlot,
    presenter: Arc<dyn Presenter>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

/// Holds the run-state flag for the lifetime of one run.
///
/// Dropping the guard releases the flag, whether the run finished, returned
/// early, panicked or had its future dropped.
struct RunGuard<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> RunGuard<'a> {
    fn acquire(
        orchestrator: &'a Orchestrator,
        token: CancellationToken,
    ) -> Option<Self> {
        orchestrator
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        *orchestrator.cancel_slot() = Some(token);
        Some(Self { orchestrator })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.cancel_slot().take();
        self.orchestrator.running.store(false, Ordering::Release);
    }
}

impl Orchestrator {
    /// Validate `config` and prepare endpoint rotation and scoring for
    /// every metric.
    pub fn new(
        config: SpeedConfig,
        client: Client,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self, SpeedTestError> {
        config.validate()?;

        Ok(Self {
            ping: MetricSlot::from_config(&config, Metric::Ping)?,
            download: MetricSlot::from_config(&config, Metric::Download)?,
            upload: MetricSlot::from_config(&config, Metric::Upload)?,
            sampler: Sampler::new(client.clone()),
            client,
            config,
            presenter,
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SpeedConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Abort every in-flight probe of the active run. Does nothing when idle.
    pub fn cancel(&self) {
        if let Some(token) = self.cancel_slot().as_ref() {
            info!("Cancelling speed test");
            token.cancel();
        }
    }

    /// Run a full speed test.
    ///
    /// Returns `None` without doing anything when a run is already in
    /// progress.
    pub async fn start(&self) -> Option<RunReport> {
        let token = CancellationToken::new();
        let Some(_guard) = RunGuard::acquire(self, token.clone()) else {
            debug!("Speed test already running, ignoring start");
            return None;
        };

        self.presenter
            .on_run_status(RunStatus::Running, "Speed test running...");
        self.reset_metrics();

        Some(self.run(&token).await)
    }

    async fn run(&self, token: &CancellationToken) -> RunReport {
        let order = &self.config.order;
        let mut results: Vec<MetricResult> = Vec::with_capacity(order.len());
        let mut failures = Vec::new();
        let mut error = None;

        for &metric in order {
            let set = match self
                .sampler
                .measure(metric, &self.config.plan_for(metric), self.endpoints(metric), token)
                .await
            {
                Ok(set) => set,
                Err(e) => {
                    warn!("{} measurement aborted the run: {}", metric, e);
                    error = Some(e);
                    break;
                }
            };

            if token.is_cancelled() {
                return self.finish_cancelled();
            }

            match reduce(&set, self.scale(metric)) {
                Some(result) => {
                    info!(
                        "{}: {:.2} {} over {} samples",
                        metric, result.value, result.unit, result.samples
                    );
                    self.presenter.on_metric_update(
                        metric,
                        Some(result.value),
                        result.tier,
                        result.gauge,
                    );
                    results.push(result);
                }
                None => {
                    let failure = SpeedTestError::unmeasured(metric, set.last_failure());
                    warn!("{}", failure);
                    failures.push(MetricFailure::new(metric, failure));
                }
            }
        }

        let loaded_latency = if self.config.loaded_latency.enabled && error.is_none() {
            let idle_ping = results
                .iter()
                .find(|result| result.metric == Metric::Ping)
                .map(|result| result.value);
            let loaded = self.measure_loaded_latency(token, idle_ping).await;

            if token.is_cancelled() {
                return self.finish_cancelled();
            }
            Some(loaded)
        } else {
            None
        };

        let unmeasured: Vec<Metric> = order
            .iter()
            .copied()
            .filter(|metric| !results.iter().any(|result| result.metric == *metric))
            .collect();

        let outcome = match error {
            Some(_) => RunOutcome::Failed,
            None => RunOutcome::classify(results.len(), order.len()),
        };

        let report = RunReport::new(
            outcome,
            results,
            unmeasured,
            failures,
            loaded_latency,
            error.map(|e| e.to_string()),
        );

        info!("Speed test finished: {:?}", report.outcome);
        self.presenter.on_run_status(report.status, &report.message);
        report
    }

    /// Sample ping while background downloads keep the link busy.
    ///
    /// Sampling starts only after background data is flowing, and the load
    /// is stopped only after the last ping probe has settled.
    async fn measure_loaded_latency(
        &self,
        token: &CancellationToken,
        idle_ping: Option<f64>,
    ) -> LoadedLatencyResult {
        let settings = &self.config.loaded_latency;
        let timeout = self.config.timeout();
        let generator = LoadGenerator::new(
            &self.client,
            &self.download.endpoints,
            settings.streams,
            timeout,
        );
        let plan = SamplingPlan::new(settings.samples, timeout);

        let flowing = Notify::new();
        let stop = token.child_token();

        info!(
            "Measuring loaded latency with {} background streams",
            settings.streams
        );

        let sampling = async {
            let load_started = tokio::select! {
                _ = flowing.notified() => true,
                _ = sleep(timeout) => false,
                _ = token.cancelled() => false,
            };

            let set = if load_started {
                match self
                    .sampler
                    .measure(Metric::Ping, &plan, &self.ping.endpoints, token)
                    .await
                {
                    Ok(set) => Some(set),
                    Err(e) => {
                        warn!("Loaded latency sampling failed: {}", e);
                        None
                    }
                }
            } else {
                warn!("Background load never started, skipping loaded latency");
                None
            };

            stop.cancel();
            set
        };

        let (stats, set) = tokio::join!(generator.run(&flowing, &stop), sampling);
        let set = set.unwrap_or_else(|| ObservationSet::new(Metric::Ping));

        let window = LoadWindow {
            load_started: stats.started_at,
            load_stopped: stats.stopped_at,
            busy: stats.busy,
            sampling: set.window(),
        };
        let ping = reduce(&set, &self.ping.scale);
        let added_latency_ms = match (&ping, idle_ping) {
            (Some(loaded), Some(idle)) => Some(loaded.value - idle),
            _ => None,
        };

        let load_covered_sampling = window.covers_sampling();
        if ping.is_some() && !load_covered_sampling {
            warn!("Background load went idle while loaded latency was sampled");
        }

        if let Some(added) = added_latency_ms {
            info!("Latency under load: {:+.2} ms over idle", added);
        }

        LoadedLatencyResult {
            ping,
            added_latency_ms,
            load_streams: settings.streams,
            background_requests: stats.requests,
            background_bytes: stats.bytes,
            load_covered_sampling,
            window,
        }
    }

    /// Discard everything gathered so far and go back to idle.
    fn finish_cancelled(&self) -> RunReport {
        self.reset_metrics();

        let report = RunReport::new(
            RunOutcome::Cancelled,
            Vec::new(),
            self.config.order.clone(),
            Vec::new(),
            None,
            None,
        );
        self.presenter.on_run_status(report.status, &report.message);
        report
    }

    fn reset_metrics(&self) {
        for metric in Metric::ALL {
            self.presenter.on_metric_update(
                metric,
                None,
                QualityTier::Unmeasured,
                Gauge::EMPTY,
            );
        }
    }

    fn slot(&self, metric: Metric) -> &MetricSlot {
        match metric {
            Metric::Ping => &self.ping,
            Metric::Download => &self.download,
            Metric::Upload => &self.upload,
        }
    }

    fn endpoints(&self, metric: Metric) -> &EndpointSource {
        &self.slot(metric).endpoints
    }

    fn scale(&self, metric: Metric) -> &MetricScale {
        &self.slot(metric).scale
    }

    fn cancel_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{exit_codes, ErrorKind};
    use crate::presenter::testing::{Event, RecordingPresenter};
    use std::time::Duration;
    use tokio::time::Instant;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url(server: &MockServer, route: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), route)).unwrap()
    }

    fn config_for(server: &MockServer) -> SpeedConfig {
        let mut config = SpeedConfig {
            timeout_ms: 2_000,
            upload_bytes: 4 * 1024,
            ..SpeedConfig::default()
        };
        config.ping.endpoints = vec![url(server, "/ping")];
        config.download.endpoints = vec![url(server, "/down")];
        config.upload.endpoints = vec![url(server, "/up")];
        for metric in Metric::ALL {
            config.metric_mut(metric).samples = 2;
        }
        config
    }

    async fn mount_ping(server: &MockServer, delay: Duration) {
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(204).set_delay(delay))
            .mount(server)
            .await;
    }

    async fn mount_download(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 100_000]))
            .mount(server)
            .await;
    }

    async fn mount_upload(server: &MockServer, status: u16) {
        Mock::given(method("POST"))
            .and(path("/up"))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    fn orchestrator(
        config: SpeedConfig,
    ) -> (Orchestrator, Arc<RecordingPresenter>) {
        let presenter = Arc::new(RecordingPresenter::default());
        let orchestrator =
            Orchestrator::new(config, Client::new().unwrap(), presenter.clone())
                .unwrap();
        (orchestrator, presenter)
    }

    #[tokio::test]
    async fn test_full_run_succeeds() {
        let server = MockServer::start().await;
        mount_ping(&server, Duration::ZERO).await;
        mount_download(&server).await;
        mount_upload(&server, 200).await;

        let (orchestrator, presenter) = orchestrator(config_for(&server));
        let report = orchestrator.start().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(report.exit_code(), exit_codes::SUCCESS);
        assert_eq!(report.results.len(), 3);
        assert!(report.unmeasured.is_empty());
        assert!(report.result(Metric::Download).unwrap().value > 0.0);
        assert_eq!(presenter.statuses(), vec![RunStatus::Running, RunStatus::Success]);

        let events = presenter.events();
        for (event, metric) in events[1..4].iter().zip(Metric::ALL) {
            assert_eq!(
                *event,
                Event::Metric(metric, None, QualityTier::Unmeasured)
            );
        }
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_failed_upload_is_partial() {
        let server = MockServer::start().await;
        mount_ping(&server, Duration::ZERO).await;
        mount_download(&server).await;
        mount_upload(&server, 500).await;

        let (orchestrator, presenter) = orchestrator(config_for(&server));
        let report = orchestrator.start().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Partial);
        assert_eq!(report.exit_code(), exit_codes::PARTIAL_FAILURE);
        assert_eq!(report.results.len(), 2);
        assert!(report.result(Metric::Upload).is_none());
        assert_eq!(report.unmeasured, vec![Metric::Upload]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].metric, Metric::Upload);
        assert_eq!(report.failures[0].kind, ErrorKind::Api);
        assert!(report.failures[0].message.contains("500"));
        assert_eq!(presenter.statuses().last(), Some(&RunStatus::Partial));
    }

    #[tokio::test]
    async fn test_nothing_measured_is_failure() {
        // No mocks mounted: every request gets a 404.
        let server = MockServer::start().await;

        let (orchestrator, presenter) = orchestrator(config_for(&server));
        let report = orchestrator.start().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.status, RunStatus::Error);
        assert!(report.results.is_empty());
        assert_eq!(report.unmeasured.len(), 3);
        assert_eq!(report.failures.len(), 3);
        assert!(report.failures.iter().all(|f| f.kind == ErrorKind::Api));
        assert!(report.message.contains("try again"));
        assert_eq!(presenter.statuses().last(), Some(&RunStatus::Error));
    }

    #[tokio::test]
    async fn test_second_start_is_a_no_op() {
        let server = MockServer::start().await;
        mount_ping(&server, Duration::from_millis(150)).await;
        mount_download(&server).await;
        mount_upload(&server, 200).await;

        let (orchestrator, presenter) = orchestrator(config_for(&server));

        let (first, second) = tokio::join!(orchestrator.start(), async {
            sleep(Duration::from_millis(50)).await;
            orchestrator.start().await
        });

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(
            presenter
                .statuses()
                .iter()
                .filter(|status| **status == RunStatus::Running)
                .count(),
            1
        );

        assert!(!orchestrator.is_running());
        assert!(orchestrator.start().await.is_some());
    }

    #[tokio::test]
    async fn test_cancel_discards_and_releases() {
        let server = MockServer::start().await;
        mount_ping(&server, Duration::from_secs(3)).await;

        let (orchestrator, presenter) = orchestrator(config_for(&server));
        let started = Instant::now();

        let (report, _) = tokio::join!(orchestrator.start(), async {
            sleep(Duration::from_millis(100)).await;
            assert!(orchestrator.is_running());
            orchestrator.cancel();
        });
        let report = report.unwrap();

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.exit_code(), exit_codes::CANCELLED);
        assert!(report.results.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!orchestrator.is_running());
        assert_eq!(presenter.statuses().last(), Some(&RunStatus::Idle));
    }

    #[tokio::test]
    async fn test_cancel_when_idle_does_nothing() {
        let server = MockServer::start().await;
        let (orchestrator, presenter) = orchestrator(config_for(&server));

        orchestrator.cancel();
        assert!(!orchestrator.is_running());
        assert!(presenter.events().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_run_releases_state() {
        let server = MockServer::start().await;
        mount_ping(&server, Duration::from_secs(3)).await;

        let (orchestrator, _presenter) = orchestrator(config_for(&server));

        let result =
            tokio::time::timeout(Duration::from_millis(100), orchestrator.start())
                .await;

        assert!(result.is_err());
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = SpeedConfig::default();
        config.download.samples = 0;

        let error = Orchestrator::new(
            config,
            Client::new().unwrap(),
            Arc::new(RecordingPresenter::default()),
        )
        .err()
        .unwrap();

        assert_eq!(error.kind, ErrorKind::Config);
        assert_eq!(error.exit_code(), exit_codes::CONFIG_ERROR);
    }

    #[tokio::test]
    async fn test_loaded_latency_is_sampled_under_load() {
        let server = MockServer::start().await;
        mount_ping(&server, Duration::from_millis(10)).await;
        mount_download(&server).await;
        mount_upload(&server, 200).await;

        let mut config = config_for(&server);
        config.loaded_latency.enabled = true;
        config.loaded_latency.streams = 2;
        config.loaded_latency.samples = 3;

        let (orchestrator, _presenter) = orchestrator(config);
        let report = orchestrator.start().await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Success);

        let loaded = report.loaded_latency.unwrap();
        let ping = loaded.ping.unwrap();
        assert_eq!(ping.samples, 3);
        assert!(loaded.added_latency_ms.is_some());
        assert!(loaded.background_bytes > 0);
        assert_eq!(loaded.load_streams, 2);

        let window = loaded.window;
        let (first, last) = window.sampling.unwrap();
        assert!(window.load_started.unwrap() <= first);
        assert!(window.load_stopped >= last);
        assert!(loaded.load_covered_sampling);
    }

    #[tokio::test]
    async fn test_stalled_load_does_not_cover_sampling() {
        let server = MockServer::start().await;
        mount_ping(&server, Duration::from_millis(50)).await;
        mount_upload(&server, 200).await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5u8; 1_000]))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut config = config_for(&server);
        config.order = vec![Metric::Ping];
        config.loaded_latency.enabled = true;
        config.loaded_latency.streams = 1;
        config.loaded_latency.samples = 5;

        let (orchestrator, _presenter) = orchestrator(config);
        let report = orchestrator.start().await.unwrap();

        let loaded = report.loaded_latency.unwrap();
        assert!(loaded.ping.is_some());
        assert_eq!(loaded.background_requests, 1);
        assert_eq!(loaded.background_bytes, 1_000);
        assert!(!loaded.load_covered_sampling);
        assert!(!loaded.window.covers_sampling());
    }

    #[tokio::test]
    async fn test_rotation_persists_across_runs() {
        let server = MockServer::start().await;
        for route in ["/a", "/b"] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(204))
                .mount(&server)
                .await;
        }

        let mut config = config_for(&server);
        config.order = vec![Metric::Ping];
        config.ping.samples = 1;
        config.ping.endpoints = vec![url(&server, "/a"), url(&server, "/b")];

        let (orchestrator, _presenter) = orchestrator(config);
        for _ in 0..3 {
            let report = orchestrator.start().await.unwrap();
            assert_eq!(report.outcome, RunOutcome::Success);
        }

        let paths: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|request| request.url.path().to_string())
            .collect();

        assert_eq!(paths, vec!["/a", "/b", "/a"]);
    }
}
