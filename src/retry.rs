//! Reconnection backoff for the source and sink connectors.
//!
//! Both connectors wrap their transport operations in [`with_backoff`],
//! a retry decorator that re-invokes the exact same logical operation
//! after a capped exponential delay whenever it fails with a transport
//! error. Non-transport errors propagate immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Capped exponential backoff policy.
///
/// The delay before attempt `n` (zero-based) is
/// `min(border, start * factor^n)`. The attempt counter is owned by the
/// retry loop and resets whenever an operation succeeds.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Initial delay.
    pub start: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
    /// Upper bound on the delay.
    pub border: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            start: Duration::from_millis(100),
            factor: 2.0,
            border: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay to sleep before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.factor.powi(attempt.min(63) as i32);
        // Computed in float seconds and capped before conversion so a
        // large attempt count cannot overflow Duration arithmetic.
        let secs = (self.start.as_secs_f64() * factor).min(self.border.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Run `op`, retrying forever on transport errors with capped exponential
/// backoff. Any other error is returned to the caller unchanged.
///
/// `op` is a closure producing a fresh future per attempt, so the exact
/// same logical operation (same query, same cursor, same batch) is
/// re-issued each time.
pub async fn with_backoff<T, F, Fut>(policy: &Backoff, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transport() => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    "{what} failed ({e}); retry {} in {:?}",
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> Backoff {
        Backoff {
            start: Duration::from_millis(1),
            factor: 2.0,
            border: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_grows_exponentially_until_border() {
        let b = Backoff {
            start: Duration::from_millis(100),
            factor: 2.0,
            border: Duration::from_secs(10),
        };
        assert_eq!(b.delay(0), Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(200));
        assert_eq!(b.delay(2), Duration::from_millis(400));
        // Capped at the border from attempt 7 on (100ms * 2^7 = 12.8s).
        assert_eq!(b.delay(7), Duration::from_secs(10));
        assert_eq!(b.delay(60), Duration::from_secs(10));
    }

    #[test]
    fn test_delay_does_not_overflow_on_huge_attempts() {
        let b = Backoff::default();
        assert_eq!(b.delay(u32::MAX), b.border);
    }

    #[tokio::test]
    async fn test_retries_transport_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&policy(), "test op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(SyncError::Transport("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_query_error_propagates_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(&policy(), "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::Query("syntax error".into())) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Query(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
