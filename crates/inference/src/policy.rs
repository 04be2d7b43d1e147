//! Timeout and bounded retry around capability calls

use crate::{CapabilityError, CapabilityResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How a single capability call is bounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Limit on each attempt
    pub timeout: Duration,
    /// Extra attempts after a retryable failure
    pub retries: u32,
    /// Delay before the first retry, doubled for each further one
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retries: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

impl CallPolicy {
    /// Single attempt with the given timeout
    #[must_use]
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            timeout,
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op`, retrying timeouts and unavailability up to `retries` times
    pub async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> CapabilityResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CapabilityResult<T>>,
    {
        let mut attempt = 0;
        let mut delay = self.backoff;

        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CapabilityError::Timeout(self.timeout)),
            };

            match outcome {
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retrying in {:?} (attempt {}/{})",
                        what, e, delay, attempt, self.retries
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                outcome => return outcome,
            }
        }
    }
}
