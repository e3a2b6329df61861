//! Async test helpers
//!
//! Timeout wrappers and polling for conditions that settle asynchronously.

use std::future::Future;
use tokio::time::{error::Elapsed, timeout, Duration};

/// Upper bound for any single wait in tests
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between checks in [`eventually`]
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Run `future` with [`DEFAULT_TEST_TIMEOUT`]
pub async fn with_timeout<F: Future>(future: F) -> Result<F::Output, Elapsed> {
    timeout(DEFAULT_TEST_TIMEOUT, future).await
}

/// Poll `condition` until it holds, panicking after [`DEFAULT_TEST_TIMEOUT`]
pub async fn eventually<F>(condition: F)
where
    F: FnMut() -> bool,
{
    eventually_within(DEFAULT_TEST_TIMEOUT, condition).await
}

/// Poll `condition` until it holds, panicking after `limit`
pub async fn eventually_within<F>(limit: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {limit:?}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed() {
        let result = timeout(Duration::from_millis(10), tokio::time::sleep(Duration::from_secs(1))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_eventually_polls_until_true() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        eventually(move || c.fetch_add(1, Ordering::SeqCst) >= 3).await;
        assert!(counter.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    #[should_panic(expected = "condition not met")]
    async fn test_eventually_panics_on_timeout() {
        eventually_within(Duration::from_millis(20), || false).await;
    }
}
