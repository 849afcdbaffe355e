use herbarium::SyncProgress;

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::FetchingRecords { label } => {
                tracing::info!(label = %label, "Fetching");
            }

            SyncProgress::FetchedPage {
                label,
                page,
                count,
                total_so_far,
            } => {
                tracing::debug!(label = %label, page, count, total_so_far, "Fetched page");
            }

            SyncProgress::FetchComplete { label, total } => {
                tracing::info!(label = %label, total, "Fetch complete");
            }

            SyncProgress::RetryBackoff {
                url,
                attempt,
                retry_after_ms,
                error,
            } => {
                tracing::warn!(url = %url, attempt, retry_after_ms, error = %error, "Request failed, retrying");
            }

            SyncProgress::RateLimitWait { wait_ms } => {
                tracing::info!(wait_ms, "Request budget spent, waiting");
            }

            SyncProgress::Conflict { id, value } => {
                tracing::warn!(id, value = %value, "Matches both patterns; skipped");
            }

            SyncProgress::Added { id, dry_run } => {
                tracing::info!(id, dry_run, "Added to project");
            }

            SyncProgress::AddFailed { id, error } => {
                tracing::warn!(id, error = %error, "Failed to add");
            }

            SyncProgress::Removed { id, dry_run } => {
                tracing::info!(id, dry_run, "Removed from project");
            }

            SyncProgress::RemoveFailed { id, error } => {
                tracing::warn!(id, error = %error, "Failed to remove");
            }

            SyncProgress::MissingHandle { id } => {
                tracing::warn!(id, "No membership link; cannot remove");
            }

            SyncProgress::ValidationComplete { members, invalid } => {
                tracing::info!(members, invalid, "Validation complete");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!("{}", message);
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
