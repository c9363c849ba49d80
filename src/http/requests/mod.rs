pub mod download;
pub mod ping;
pub mod upload;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::Method;
use url::Url;

/// User agent sent with every probe.
pub const UA: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION")
);

/// Shape of a probe request.
pub trait Request {
    const METHOD: Method = Method::GET;

    fn url(&self) -> &Url;

    fn headers(&self) -> HeaderMap {
        no_cache_headers()
    }

    fn body(&self) -> Option<Bytes> {
        None
    }
}

impl<R: Request> Request for &R {
    const METHOD: Method = R::METHOD;

    fn url(&self) -> &Url {
        (**self).url()
    }

    fn headers(&self) -> HeaderMap {
        (**self).headers()
    }

    fn body(&self) -> Option<Bytes> {
        (**self).body()
    }
}

pub(crate) fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    headers
}
