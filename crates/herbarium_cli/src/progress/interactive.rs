use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use herbarium::SyncProgress;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Consolidated progress state behind a single lock.
#[derive(Default)]
struct ProgressState {
    /// Fetch spinners by collection label.
    fetch_bars: HashMap<String, ProgressBar>,
    /// Counter for add/remove calls.
    change_bar: Option<ProgressBar>,
    changed: usize,
    failed: usize,
}

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    multi: MultiProgress,
    state: Mutex<ProgressState>,
}

impl InteractiveReporter {
    pub fn new() -> Self {
        Self::with_multi(MultiProgress::new())
    }

    /// Reporter that draws nothing.
    #[cfg(test)]
    pub fn hidden() -> Self {
        Self::with_multi(MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()))
    }

    fn with_multi(multi: MultiProgress) -> Self {
        Self {
            multi,
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn handle(&self, event: SyncProgress) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            SyncProgress::FetchingRecords { label } => {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(Self::counter_style());
                pb.set_prefix(label.clone());
                pb.set_message("fetching");
                pb.enable_steady_tick(Duration::from_millis(100));
                if let Some(old) = state.fetch_bars.insert(label, pb) {
                    old.finish_and_clear();
                }
            }

            SyncProgress::FetchedPage {
                label,
                page,
                total_so_far,
                ..
            } => {
                if let Some(pb) = state.fetch_bars.get(&label) {
                    pb.set_position(total_so_far as u64);
                    pb.set_message(format!("page {page}"));
                }
            }

            SyncProgress::FetchComplete { label, total } => {
                if let Some(pb) = state.fetch_bars.get(&label) {
                    pb.set_style(Self::spinner_style());
                    pb.finish_with_message(format!("✓ {total} fetched"));
                }
            }

            SyncProgress::RetryBackoff {
                attempt,
                retry_after_ms,
                error,
                ..
            } => {
                self.println(&format!(
                    "  ↻ attempt {attempt} failed ({error}); retrying in {:.1}s",
                    retry_after_ms as f64 / 1000.0
                ));
            }

            SyncProgress::RateLimitWait { wait_ms } => {
                for pb in state.fetch_bars.values().filter(|pb| !pb.is_finished()) {
                    pb.set_message(format!("rate limited, waiting {:.1}s", wait_ms as f64 / 1000.0));
                }
            }

            SyncProgress::Conflict { id, value } => {
                self.println(&format!("  ⚠ {id}: '{value}' matches both patterns; skipped"));
            }

            SyncProgress::Added { id, dry_run } | SyncProgress::Removed { id, dry_run } => {
                state.changed += 1;
                let verb = if dry_run { "planned" } else { "applied" };
                let msg = format!("{} {verb}, {} failed (last: {id})", state.changed, state.failed);
                self.change_bar(&mut state).set_message(msg);
            }

            SyncProgress::AddFailed { id, error } | SyncProgress::RemoveFailed { id, error } => {
                state.failed += 1;
                self.println(&format!("  ✗ {id}: {error}"));
                let msg = format!("{} applied, {} failed", state.changed, state.failed);
                self.change_bar(&mut state).set_message(msg);
            }

            SyncProgress::MissingHandle { id } => {
                state.failed += 1;
                self.println(&format!("  ✗ {id}: no membership link, cannot remove"));
            }

            SyncProgress::ValidationComplete { .. } => {
                if let Some(pb) = state.change_bar.take() {
                    pb.finish();
                }
            }

            SyncProgress::Warning { message } => {
                self.println(&format!("  ⚠ {message}"));
            }

            _ => {}
        }
    }

    fn change_bar<'s>(&self, state: &'s mut ProgressState) -> &'s ProgressBar {
        state.change_bar.get_or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(Self::spinner_style());
            pb.set_prefix("project");
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        })
    }

    /// Write a report line to `out` while the spinners are cleared.
    pub fn report(&self, out: &mut impl Write, line: &str) -> io::Result<()> {
        self.multi.suspend(|| writeln!(out, "{line}"))
    }

    /// Print a status line above the spinners.
    pub fn println(&self, line: &str) {
        if self.multi.println(line).is_err() {
            println!("{line}");
        }
    }

    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for pb in state.fetch_bars.values() {
            if !pb.is_finished() {
                pb.finish_and_clear();
            }
        }
        if let Some(pb) = state.change_bar.take() {
            pb.finish();
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {msg}")
            .expect("Invalid template")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }

    fn counter_style() -> ProgressStyle {
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.cyan} {spinner:.green} {pos:>6} {msg}")
            .expect("Invalid template")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }
}

impl Default for InteractiveReporter {
    fn default() -> Self {
        Self::new()
    }
}
