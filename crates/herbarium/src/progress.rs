//! Progress reporting types for fetch and reconcile runs.
//!
//! The library never prints. It emits [`SyncProgress`] events through an
//! optional callback and the CLI decides how to render them.

/// Progress events emitted during fetch and reconcile runs.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// Starting a paginated collection pass.
    FetchingRecords {
        /// What is being collected ("observations", "project members").
        label: String,
    },

    /// Fetched one page.
    FetchedPage {
        label: String,
        /// Page number within this pass (1-indexed).
        page: u32,
        /// Records on this page.
        count: usize,
        /// Running total for this pass.
        total_so_far: usize,
    },

    /// A collection pass finished normally.
    FetchComplete { label: String, total: usize },

    /// A request failed and will be retried after a delay.
    RetryBackoff {
        url: String,
        /// Attempt that just failed (1-indexed).
        attempt: usize,
        retry_after_ms: u64,
        error: String,
    },

    /// The request budget for the window is spent; sleeping.
    RateLimitWait { wait_ms: u64 },

    /// A record matches both the include and exclude pattern.
    Conflict { id: u64, value: String },

    /// Added a record to the project (or would have, in dry-run).
    Added { id: u64, dry_run: bool },

    /// Failed to add a record.
    AddFailed { id: u64, error: String },

    /// Removed a record from the project (or would have, in dry-run).
    Removed { id: u64, dry_run: bool },

    /// Failed to remove a record.
    RemoveFailed { id: u64, error: String },

    /// A member to remove has no membership-link handle.
    MissingHandle { id: u64 },

    /// Validation finished.
    ValidationComplete { members: usize, invalid: usize },

    /// Warning message (non-fatal).
    Warning { message: String },
}

/// Callback type for progress reporting.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(callback: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = callback {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn emit_with_none_callback_is_a_no_op() {
        emit(None, SyncProgress::RateLimitWait { wait_ms: 1 });
    }

    #[test]
    fn emit_invokes_callback() {
        let events: Arc<Mutex<Vec<SyncProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |event| {
            capture
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event);
        });

        emit(
            Some(&callback),
            SyncProgress::FetchComplete {
                label: "observations".into(),
                total: 3,
            },
        );

        let events = events.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SyncProgress::FetchComplete { total: 3, .. }
        ));
    }
}
