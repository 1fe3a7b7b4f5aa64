//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::CallError;

/// Wrap a fallible future with a deadline, naming the operation in the error.
pub async fn with_timeout<T>(
    operation: &'static str,
    duration: Duration,
    future: impl Future<Output = Result<T, CallError>>,
) -> Result<T, CallError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(CallError::Timeout {
            operation,
            ms: duration.as_millis() as u64,
        }),
    }
}
