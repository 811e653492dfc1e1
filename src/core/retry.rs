use std::future::Future;
use std::time::Duration;

use crate::core::errors::ApiError;

/// Runs `op` under `timeout`, retrying up to `retries` more times when the
/// attempt times out. Other errors are returned immediately.
pub async fn with_timeout_retry<T, F, Fut>(
    label: &str,
    timeout: Duration,
    retries: u32,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(Err(err)) if err.is_timeout() => Err(err),
            Ok(result) => return result,
            Err(_) => Err(ApiError::Timeout(format!(
                "{} timed out after {:?}",
                label, timeout
            ))),
        };

        if attempt >= retries {
            return outcome;
        }
        attempt += 1;
        tracing::warn!(operation = label, attempt, "Upstream call timed out, retrying");
    }
}
