use crate::http::requests::Request;
use url::Url;

/// Minimal GET whose round trip is the latency sample.
#[derive(Debug, Clone)]
pub struct PingRequest {
    pub url: Url,
}

impl Request for PingRequest {
    fn url(&self) -> &Url {
        &self.url
    }
}
