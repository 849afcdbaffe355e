//! Request budget over a sliding time window.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::progress::{ProgressCallback, SyncProgress, emit};

/// Default rate limits for the observation API.
pub mod rate_limits {
    use std::time::Duration;

    /// Requests allowed per window.
    pub const DEFAULT_MAX_REQUESTS: usize = 50;
    /// Length of the window.
    pub const WINDOW: Duration = Duration::from_secs(60);
}

/// Blocks callers so that no more than `max_requests` acquisitions happen in
/// any trailing `window`.
///
/// Keeps the instants of the most recent `max_requests` acquisitions. When
/// the log is full, the caller sleeps until the oldest entry falls out of
/// the window. This bounds every rolling window, including bursts that
/// straddle a window boundary.
///
/// # Example
///
/// ```ignore
/// use herbarium::rate_limit::ApiRateLimiter;
///
/// let limiter = ApiRateLimiter::per_minute(50);
///
/// // Before each request attempt:
/// limiter.acquire(None).await;
/// transport.send(request).await?;
/// ```
#[derive(Debug)]
pub struct ApiRateLimiter {
    max_requests: usize,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl ApiRateLimiter {
    /// Create a limiter allowing `max_requests` per `window` (0 is treated as 1).
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            issued: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Create a limiter allowing `max_requests` per minute.
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, rate_limits::WINDOW)
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Acquisitions still inside the trailing window.
    pub fn used(&self) -> usize {
        let issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        issued
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count()
    }

    /// Wait until one more request fits in the budget, then record it.
    pub async fn acquire(&self, on_progress: Option<&ProgressCallback>) {
        loop {
            let wait = {
                let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                while issued
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.window)
                {
                    issued.pop_front();
                }

                if issued.len() < self.max_requests {
                    issued.push_back(now);
                    return;
                }

                match issued.front() {
                    Some(&oldest) => self.window - now.duration_since(oldest),
                    None => Duration::ZERO,
                }
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "Request budget spent, waiting");
            emit(
                on_progress,
                SyncProgress::RateLimitWait {
                    wait_ms: wait.as_millis() as u64,
                },
            );
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for ApiRateLimiter {
    fn default() -> Self {
        Self::per_minute(rate_limits::DEFAULT_MAX_REQUESTS)
    }
}
