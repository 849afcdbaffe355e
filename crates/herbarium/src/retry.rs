//! Retry with exponential backoff for API requests.
//!
//! Every attempt, including retries, first takes one unit from the shared
//! [`ApiRateLimiter`]. Between attempts the caller sleeps
//! `min_delay * 2^attempt` (capped at `max_delay`) plus up to one
//! `min_delay` of jitter, so the jitter never grows with the attempt.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{BackoffBuilder, Retryable};

use crate::error::{ApiError, short_error_message};
use crate::progress::{ProgressCallback, SyncProgress, emit};
use crate::rate_limit::ApiRateLimiter;

/// Maximum attempts for a single request (first try included).
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Base backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Cap on a single backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Configuration for retry operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the second attempt (doubles each time).
    pub min_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Total attempts, first try included.
    pub max_attempts: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts,
            with_jitter: true,
        }
    }

    /// Set the number of attempts (clamped to at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build the backoff schedule for this configuration.
    #[must_use]
    pub fn into_backoff(self) -> JitteredBackoffBuilder {
        JitteredBackoffBuilder { config: self }
    }
}

/// Builds a [`JitteredBackoff`] for one request.
#[derive(Debug, Clone)]
pub struct JitteredBackoffBuilder {
    config: RetryConfig,
}

impl BackoffBuilder for JitteredBackoffBuilder {
    type Backoff = JitteredBackoff;

    fn build(self) -> Self::Backoff {
        JitteredBackoff {
            retries_left: self.config.max_attempts.saturating_sub(1),
            attempt: 0,
            config: self.config,
        }
    }
}

/// Delays between attempts: `min_delay * 2^attempt + jitter`, where
/// jitter is uniform in `[0, min_delay)`.
#[derive(Debug, Clone)]
pub struct JitteredBackoff {
    config: RetryConfig,
    attempt: u32,
    retries_left: usize,
}

impl JitteredBackoff {
    fn base_delay(&self) -> Duration {
        let factor = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        self.config
            .min_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }
}

impl Iterator for JitteredBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;

        let mut delay = self.base_delay();
        if self.config.with_jitter {
            delay += self.config.min_delay.mul_f64(rand::random::<f64>());
        }
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}

/// Runs requests with rate limiting and bounded retries.
///
/// # Example
///
/// ```ignore
/// use herbarium::retry::{RetryConfig, RetryingFetcher};
/// use herbarium::rate_limit::ApiRateLimiter;
///
/// let fetcher = RetryingFetcher::new(Arc::new(ApiRateLimiter::per_minute(50)), RetryConfig::default());
/// let page = fetcher.fetch("observations", || client.get_once(&url), None).await?;
/// ```
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    limiter: Arc<ApiRateLimiter>,
    config: RetryConfig,
}

impl RetryingFetcher {
    pub fn new(limiter: Arc<ApiRateLimiter>, config: RetryConfig) -> Self {
        Self { limiter, config }
    }

    pub fn limiter(&self) -> &Arc<ApiRateLimiter> {
        &self.limiter
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts.
    ///
    /// Retryable failures that outlast every attempt come back as
    /// [`ApiError::FetchExhausted`] wrapping the last error.
    pub async fn fetch<T, F, Fut>(
        &self,
        label: &str,
        mut operation: F,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let attempt = AtomicUsize::new(0);
        let limiter = &self.limiter;

        let attempt_op = || {
            attempt.fetch_add(1, Ordering::SeqCst);
            let request = operation();
            async move {
                limiter.acquire(on_progress).await;
                request.await
            }
        };

        let result = attempt_op
            .retry(self.config.clone().into_backoff())
            .when(ApiError::is_retryable)
            .notify(|err, dur| {
                let current_attempt = attempt.load(Ordering::SeqCst);
                tracing::debug!(
                    "Request for {} failed, retrying in {:?} (attempt {}): {}",
                    label,
                    dur,
                    current_attempt,
                    short_error_message(err)
                );
                emit(
                    on_progress,
                    SyncProgress::RetryBackoff {
                        url: label.to_string(),
                        attempt: current_attempt,
                        retry_after_ms: dur.as_millis() as u64,
                        error: short_error_message(err),
                    },
                );
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_retryable() => {
                let attempts = attempt.load(Ordering::SeqCst);
                tracing::warn!(label, attempts, error = %err, "Max retries exceeded");
                Err(ApiError::FetchExhausted {
                    attempts,
                    last: Box::new(err),
                })
            }
            Err(err) => Err(err),
        }
    }
}
