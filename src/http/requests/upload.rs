use crate::http::requests::{no_cache_headers, Request};
use bytes::Bytes;
use rand::RngCore;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use url::Url;

/// POST of a binary payload.
///
/// The payload is reference counted, so cloning the request for every sample
/// does not copy it.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub url: Url,
    pub payload: Bytes,
}

impl UploadRequest {
    pub fn new(url: Url, payload: Bytes) -> Self {
        Self { url, payload }
    }

    pub fn bytes(&self) -> u64 {
        self.payload.len() as u64
    }
}

impl Request for UploadRequest {
    const METHOD: Method = Method::POST;

    fn url(&self) -> &Url {
        &self.url
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = no_cache_headers();

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );

        headers
    }

    fn body(&self) -> Option<Bytes> {
        Some(self.payload.clone())
    }
}

/// Random payload of `size` bytes. Random data defeats transparent
/// compression on the path.
pub fn random_payload(size: usize) -> Bytes {
    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);
    Bytes::from(data)
}
