use indicatif::{ProgressBar, ProgressStyle};
use logvault_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Scan: spinner with the number of filesets seen so far
/// - Read: bar over the pending filesets
/// - Jobs: spinner per fileset
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn spinner(&self, message: String) {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self, basedirs: usize) {
        self.spinner(format!("Scanning {} director(ies)...", basedirs));
    }

    fn on_scan_progress(&self, candidates_seen: usize, current_name: &str) {
        self.with_bar(|pb| {
            pb.set_message(format!(
                "Scanning... {} filesets seen ({})",
                candidates_seen, current_name
            ))
        });
    }

    fn on_scan_complete(&self, added: usize, updated: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} added, {} updated in {:.2}s",
            added, updated, duration_secs
        );
    }

    fn on_read_start(&self, pending: usize) {
        let pb = ProgressBar::new(pending as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} Reading [{bar:30.cyan/dim}] {pos}/{len} filesets",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_read_progress(&self, done: usize, total: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(done as u64);
        });
    }

    fn on_read_complete(&self, succeeded: usize, failed: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Read complete: {} succeeded, {} failed in {:.2}s",
            succeeded, failed, duration_secs
        );
    }

    fn on_dispatch_start(&self, filesets: usize) {
        self.spinner(format!("Running jobs on {} fileset(s)...", filesets));
    }

    fn on_fileset_jobs_start(&self, fileset_name: &str, jobs: usize) {
        self.with_bar(|pb| pb.set_message(format!("Running {} job(s) on {}", jobs, fileset_name)));
    }

    fn on_fileset_jobs_complete(&self, fileset_name: &str, succeeded: usize, failed: usize) {
        self.with_bar(|pb| {
            pb.println(format!(
                "  {} {}: {} succeeded, {} failed",
                if failed == 0 { "\x1b[32m✓\x1b[0m" } else { "\x1b[31m✗\x1b[0m" },
                fileset_name,
                succeeded,
                failed
            ))
        });
    }

    fn on_dispatch_complete(&self, jobruns: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Jobs complete: {} jobrun(s) in {:.2}s",
            jobruns, duration_secs
        );
    }
}
