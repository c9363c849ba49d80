use crate::errors::ProbeError;
use crate::http::requests::Request;
use reqwest::Response;
use url::Url;

/// GET whose body is streamed and counted.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: Url,
}

impl Request for DownloadRequest {
    fn url(&self) -> &Url {
        &self.url
    }
}

/// Stream a response body to completion, calling `on_chunk` with the size of
/// every chunk as it arrives. Returns the total byte count.
pub async fn read_body(
    mut response: Response,
    mut on_chunk: impl FnMut(usize),
) -> Result<u64, ProbeError> {
    let mut total = 0u64;

    while let Some(chunk) = response.chunk().await? {
        on_chunk(chunk.len());
        total += chunk.len() as u64;
    }

    Ok(total)
}
