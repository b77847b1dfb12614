//! Retry policy for read-only oracle calls
//!
//! Transport failures on read paths are retried with exponential backoff:
//! base 1 s, cap 5 s, up to 3 attempts. Anything other than a transport
//! error is returned immediately, and committing calls must not go through
//! this helper at all.

use std::future::Future;
use std::time::Duration;

use purse_common::Error;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Run a read-only oracle call with the standard retry policy
pub async fn with_retry<F, Fut, T>(op: F) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut delay = BASE_DELAY;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Error::Transport(err)) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    "Oracle call failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt,
                    MAX_ATTEMPTS,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_retries_transport_errors() {
        let calls = AtomicU32::new(0);

        let result = with_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transport("connection reset".to_string()))
                } else {
                    Ok(21u64)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 21);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), Error> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transport("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_policy_errors_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), Error> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::QuoteUnknown) }
        })
        .await;

        assert!(matches!(result, Err(Error::QuoteUnknown)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
