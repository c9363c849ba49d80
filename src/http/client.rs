use crate::errors::{to_speed_test_error, ProbeError, SpeedTestError};
use crate::http::requests::{Request, UA};
use reqwest::{Client as ReqwestClient, Response};

/// Thin wrapper over `reqwest` that sends [`Request`] shapes.
///
/// No client-wide timeout is configured: every probe is bounded by the
/// sampler's own timeout and cancellation.
#[derive(Debug, Clone)]
pub struct Client {
    client: ReqwestClient,
}

impl Client {
    pub fn new() -> Result<Self, SpeedTestError> {
        let client = ReqwestClient::builder()
            .user_agent(UA)
            .build()
            .map_err(|e| to_speed_test_error(Box::new(e), "failed to build HTTP client"))?;

        Ok(Self { client })
    }

    /// Send a request and return the response once its headers arrive.
    ///
    /// Non-success statuses are errors.
    pub async fn send<R: Request>(
        &self,
        request: R,
    ) -> Result<Response, ProbeError> {
        let mut builder = self
            .client
            .request(R::METHOD, request.url().clone())
            .headers(request.headers());

        if let Some(body) = request.body() {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(ProbeError::Status(status));
        }

        Ok(response)
    }
}
