use crate::errors::SpeedTestError;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

/// Where probes for one metric are sent.
///
/// A list of more than one URL is used round-robin. The rotation position
/// survives between runs, so consecutive runs start on different servers.
#[derive(Debug)]
pub struct EndpointSource {
    urls: Vec<Url>,
    next: AtomicUsize,
}

impl EndpointSource {
    pub fn new(urls: Vec<Url>) -> Result<Self, SpeedTestError> {
        if urls.is_empty() {
            return Err(SpeedTestError::config("at least one endpoint is required"));
        }

        Ok(Self { urls, next: AtomicUsize::new(0) })
    }

    pub fn single(url: Url) -> Self {
        Self { urls: vec![url], next: AtomicUsize::new(0) }
    }

    /// The next endpoint in rotation.
    pub fn next(&self) -> &Url {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        &self.urls[index % self.urls.len()]
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Append a unique `t` query parameter so intermediaries do not answer from
/// cache.
pub fn with_cache_buster(url: &Url, sequence: usize) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut().append_pair(
        "t",
        &format!("{}-{}", Utc::now().timestamp_millis(), sequence),
    );
    url
}
