//! Backoff for index store calls.
//!
//! Only errors the store reports as recoverable (unavailable, rejected
//! batch, IO) are retried. Anything else surfaces on the first attempt.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use dbview_core::config::RetrySettings;
use dbview_core::{Error, Result};

/// Backoff schedule for store calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of any single wait.
    pub max_delay: Duration,
    /// Growth factor between waits.
    pub backoff_multiplier: f64,
    /// Add up to a quarter of the wait at random.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            add_jitter: settings.add_jitter,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Wait before retry number `retry` (1-based). Zero for the first attempt.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let wait = (self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        let wait = if self.add_jitter {
            wait * (1.0 + 0.25 * jitter())
        } else {
            wait
        };
        Duration::from_secs_f64(wait)
    }
}

/// Uniform-ish value in `[0, 1)`, seeded per call by the std hasher.
fn jitter() -> f64 {
    let bits = RandomState::new().build_hasher().finish();
    (bits % 1024) as f64 / 1024.0
}

/// Runs `call` against `collection`, retrying recoverable store errors
/// with backoff. Returns the last error once the retries are spent.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation: &str,
    collection: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match call().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(operation, collection, retries = retry, "Store call recovered");
                }
                return Ok(value);
            }
            Err(e) if e.is_recoverable() && retry < config.max_retries => {
                retry += 1;
                let wait = config.backoff(retry);
                warn!(
                    operation,
                    collection,
                    retry,
                    max_retries = config.max_retries,
                    error = %e,
                    "Store call failed, retrying in {:?}",
                    wait
                );
                sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Returns true if [`with_retry`] would try `error` again.
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    error.is_recoverable()
}
