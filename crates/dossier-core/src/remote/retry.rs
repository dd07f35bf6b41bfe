//! Retry with exponential backoff for remote I/O.
//!
//! Used only at the remote boundary (uploads, downloads, document reads).
//! Cache-hit paths never pass through here.

use crate::config::RemoteConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay between retries; doubles each attempt.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Whether to randomize delays to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RemoteConfig::MAX_RETRIES,
            base_delay: RemoteConfig::RETRY_BASE_DELAY,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the retry following attempt number `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = doubled.min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            // Factor in [0.5, 1.5) keeps the mean delay while spreading
            // concurrent retries apart.
            let factor = rand::rng().random_range(0.5..1.5);
            (capped * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }
}

/// Run `operation` until it succeeds, `should_retry` declines, or attempts
/// run out. Returns the last error on failure.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("Remote operation succeeded after {} attempts", attempt + 1);
                }
                return Ok(value);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!("Error is not retryable: {}", e);
                    return Err(e);
                }
                if attempt + 1 >= config.max_attempts {
                    warn!(
                        "All {} attempts exhausted, last error: {}",
                        config.max_attempts, e
                    );
                    return Err(e);
                }

                let delay = config.delay_for(attempt);
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    config.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
