//! Per-request deadline and run-level cancellation for a single probe.

use crate::errors::ProbeError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drive `future` until it completes, `timeout` elapses, or `cancel` fires,
/// whichever happens first. The losing branches are dropped, which aborts
/// any in-flight request.
pub async fn guarded<T, F>(
    future: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        result = tokio::time::timeout(timeout, future) => match result {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        },
    }
}
