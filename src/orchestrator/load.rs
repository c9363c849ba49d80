//! Background saturation traffic for loaded-latency sampling.
//!
//! A [`LoadGenerator`] keeps `streams` download loops busy until its stop
//! token fires. It signals once the first bytes are flowing so that latency
//! sampling begins only after the link is under load.

use crate::endpoints::{with_cache_buster, EndpointSource};
use crate::errors::ProbeError;
use crate::http::{read_body, Client, DownloadRequest};
use crate::sampler::guarded;
use futures::future::join_all;
use log::debug;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Pause after a failed background request before the stream retries.
const FAILURE_BACKOFF: Duration = Duration::from_millis(50);

/// When the background load ran relative to the latency samples.
#[derive(Debug, Clone)]
pub struct LoadWindow {
    /// First instant any background stream received data.
    pub load_started: Option<Instant>,
    /// Instant every background stream had wound down.
    pub load_stopped: Instant,
    /// Spans during which some stream had a transfer in flight.
    pub busy: Vec<(Instant, Instant)>,
    /// First probe start and last probe end of the loaded samples.
    pub sampling: Option<(Instant, Instant)>,
}

impl LoadWindow {
    /// True when load was flowing before the first sample started and some
    /// transfer stayed in flight until the last sample ended.
    pub fn covers_sampling(&self) -> bool {
        let (Some(started), Some((first, last))) = (self.load_started, self.sampling)
        else {
            return false;
        };

        if started > first || self.load_stopped < last {
            return false;
        }

        let mut busy = self.busy.clone();
        busy.sort_by_key(|(from, _)| *from);

        let mut covered_until = first;
        for (from, to) in busy {
            if from > covered_until {
                break;
            }
            covered_until = covered_until.max(to);
            if covered_until >= last {
                return true;
            }
        }

        covered_until >= last
    }
}

#[derive(Debug, Clone)]
pub struct LoadStats {
    pub started_at: Option<Instant>,
    pub stopped_at: Instant,
    pub requests: usize,
    pub bytes: u64,
    /// Busy spans of every stream, unordered.
    pub busy: Vec<(Instant, Instant)>,
}

pub struct LoadGenerator<'a> {
    client: &'a Client,
    endpoints: &'a EndpointSource,
    streams: usize,
    timeout: Duration,
}

impl<'a> LoadGenerator<'a> {
    pub fn new(
        client: &'a Client,
        endpoints: &'a EndpointSource,
        streams: usize,
        timeout: Duration,
    ) -> Self {
        Self { client, endpoints, streams, timeout }
    }

    /// Run until `stop` fires. `flowing` is notified once, when the first
    /// chunk of background data arrives.
    pub async fn run(&self, flowing: &Notify, stop: &CancellationToken) -> LoadStats {
        let first_flow = OnceLock::new();
        let bytes = AtomicU64::new(0);
        let requests = AtomicUsize::new(0);

        debug!("Starting {} background load streams", self.streams);

        let busy: Vec<(Instant, Instant)> =
            join_all((0..self.streams).map(|stream| {
                self.stream(stream, flowing, stop, &first_flow, &bytes, &requests)
            }))
            .await
            .into_iter()
            .flatten()
            .collect();

        let stats = LoadStats {
            started_at: first_flow.get().copied(),
            stopped_at: Instant::now(),
            requests: requests.into_inner(),
            bytes: bytes.into_inner(),
            busy,
        };

        debug!(
            "Background load stopped: {} requests, {} bytes",
            stats.requests, stats.bytes
        );

        stats
    }

    /// Loop downloads until stopped, returning the spans during which this
    /// stream had a transfer in flight. Back-to-back successful transfers
    /// form one span; a failure closes the span until the next attempt.
    async fn stream(
        &self,
        stream: usize,
        flowing: &Notify,
        stop: &CancellationToken,
        first_flow: &OnceLock<Instant>,
        bytes: &AtomicU64,
        requests: &AtomicUsize,
    ) -> Vec<(Instant, Instant)> {
        let mut busy = Vec::new();
        let mut busy_since: Option<Instant> = None;
        let mut sequence = stream * 1_000_000;

        while !stop.is_cancelled() {
            let url = with_cache_buster(self.endpoints.next(), sequence);
            sequence += 1;
            let since = *busy_since.get_or_insert_with(Instant::now);

            let transfer = async {
                let response = self.client.send(DownloadRequest { url }).await?;
                read_body(response, |chunk| {
                    if first_flow.set(Instant::now()).is_ok() {
                        flowing.notify_one();
                    }
                    bytes.fetch_add(chunk as u64, Ordering::Relaxed);
                })
                .await
            };

            match guarded(transfer, self.timeout, stop).await {
                Ok(_) => {
                    requests.fetch_add(1, Ordering::Relaxed);
                }
                Err(ProbeError::Cancelled) => break,
                Err(e) => {
                    debug!("Background stream {} request failed: {}", stream, e);
                    busy.push((since, Instant::now()));
                    busy_since = None;

                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = sleep(FAILURE_BACKOFF) => {}
                    }
                }
            }
        }

        if let Some(since) = busy_since {
            busy.push((since, Instant::now()));
        }

        busy
    }
}
