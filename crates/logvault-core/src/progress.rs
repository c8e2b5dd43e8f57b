/// Trait for reporting scan, read and job progress.
///
/// The CLI implements it with indicatif spinners. All methods have default
/// no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self, _basedirs: usize) {}
    fn on_scan_progress(&self, _candidates_seen: usize, _current_name: &str) {}
    fn on_scan_complete(&self, _added: usize, _updated: usize, _duration_secs: f64) {}
    fn on_read_start(&self, _pending: usize) {}
    fn on_read_progress(&self, _done: usize, _total: usize) {}
    fn on_read_complete(&self, _succeeded: usize, _failed: usize, _duration_secs: f64) {}
    fn on_dispatch_start(&self, _filesets: usize) {}
    fn on_fileset_jobs_start(&self, _fileset_name: &str, _jobs: usize) {}
    fn on_fileset_jobs_complete(&self, _fileset_name: &str, _succeeded: usize, _failed: usize) {}
    fn on_dispatch_complete(&self, _jobruns: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
