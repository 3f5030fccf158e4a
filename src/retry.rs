use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::debug;

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay before retry number `attempt + 1`: 500ms doubling, capped at 30s
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt))).min(MAX_DELAY)
}

/// Retry an async operation with exponential backoff
pub async fn retry<F, Fut, T, E>(max_attempts: u32, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(max_attempts, operation, |_| true).await
}

/// Like [`retry`], but errors rejected by `retryable` are returned at once
pub async fn retry_if<F, Fut, T, E, P>(max_attempts: u32, operation: F, retryable: P) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts || !retryable(&e) {
                    return Err(e);
                }
                let delay = backoff(attempt - 1);
                debug!("Attempt {attempt} failed: {e}, retrying in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
