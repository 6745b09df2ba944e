//! Whole-operation retry with a fixed backoff.

use std::future::Future;
use std::time::Duration;

use crate::Result;

/// Default number of attempts per transfer.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

/// Retry policy for transfers.
///
/// Only errors classified as retryable (transport and stream-protocol
/// failures) are retried; the operation restarts from scratch each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    attempts: u32,
    delay: Duration,
}

impl Retry {
    /// Creates a policy with `attempts` total tries separated by `delay`.
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Runs `op` until it succeeds, fails fatally, or attempts run out.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    tracing::warn!(op = name, attempt, error = %e, "transfer failed, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_DELAY)
    }
}
