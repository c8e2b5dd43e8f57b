use crate::checksum;
use crate::config::{self, AppConfig};
use crate::error::Error;
use crate::plugins::Plugins;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::scanner::{self, walk};
use crate::storage::models::{Fileset, StorageInstance};
use crate::storage::Database;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static SILENT: SilentReporter = SilentReporter;

/// What happened to one scanned fileset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Added { id: i64 },
    Unchanged { id: i64 },
    Updated { id: i64, changed: Vec<&'static str> },
    Superseded { old_id: i64, new_id: i64 },
    Duplicate { kept_id: i64 },
    ChecksumMismatch,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub duration: Duration,
    pub seen: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub superseded: usize,
    pub duplicates: usize,
    pub mismatched: usize,
    pub errors: usize,
    pub lost_files: usize,
    pub found_files: usize,
}

impl ScanResult {
    fn tally(&mut self, outcome: &Reconciled) {
        match outcome {
            Reconciled::Added { .. } => self.added += 1,
            Reconciled::Unchanged { .. } => self.unchanged += 1,
            Reconciled::Updated { .. } => self.updated += 1,
            Reconciled::Superseded { .. } => self.superseded += 1,
            Reconciled::Duplicate { .. } => self.duplicates += 1,
            Reconciled::ChecksumMismatch => self.mismatched += 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct ReadResult {
    pub duration: Duration,
    pub succeeded: usize,
    pub failed: usize,
}

/// The fileset catalog of one storage instance.
///
/// Not safe to run `scan_all` concurrently with itself: it assumes it is the
/// only catalog writer for the length of a pass.
pub struct Storage<'a> {
    db: &'a Database,
    plugins: &'a Plugins,
    config: &'a AppConfig,
    instance: StorageInstance,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> Storage<'a> {
    pub fn open(
        db: &'a Database,
        plugins: &'a Plugins,
        config: &'a AppConfig,
    ) -> Result<Self, Error> {
        let instance = db.ensure_storage()?;
        debug!("Using storage {}", instance.uuid);
        Ok(Self {
            db,
            plugins,
            config,
            instance,
            reporter: &SILENT,
        })
    }

    pub fn with_reporter(mut self, reporter: &'a dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn instance(&self) -> &StorageInstance {
        &self.instance
    }

    pub fn uuid(&self) -> &str {
        &self.instance.uuid
    }

    pub fn scan(&self, basedir: &str) -> Result<ScanResult, Error> {
        self.scan_all(&[basedir.to_string()])
    }

    /// Merge everything found below `basedirs` into the catalog, then flag
    /// files of active filesets that went missing or came back.
    ///
    /// A failure while merging one fileset is logged and only that fileset's
    /// changes are rolled back.
    pub fn scan_all(&self, basedirs: &[String]) -> Result<ScanResult, Error> {
        let start = Instant::now();
        let basedirs = config::non_overlapping_directories(resolve_basedirs(basedirs));
        info!("Scanning directories: {:?}", basedirs);
        self.reporter.on_scan_start(basedirs.len());

        let ignore_patterns = walk::compile_ignore_patterns(&self.config.ignore_patterns);
        let detectors = self.plugins.detector_refs();
        let mut result = ScanResult::default();

        for basedir in &basedirs {
            let path = Path::new(basedir);
            if !path.is_dir() {
                error!("Not a directory, skipping: {}", basedir);
                continue;
            }
            for found in scanner::scan(path, &detectors, &ignore_patterns) {
                result.seen += 1;
                self.reporter.on_scan_progress(result.seen, &found.name);
                let label = found.to_string();
                match self.add_or_update(found) {
                    Ok(outcome) => result.tally(&outcome),
                    Err(e) => {
                        error!("skipped {} due to error: {}", label, e);
                        result.errors += 1;
                    }
                }
            }
        }

        let (lost, found) = self.detect_missing()?;
        result.lost_files = lost;
        result.found_files = found;
        result.duration = start.elapsed();
        self.reporter.on_scan_complete(
            result.added + result.superseded,
            result.updated,
            result.duration.as_secs_f64(),
        );
        info!(
            "Scan completed in {:.2}s: {} seen, {} added, {} superseded, {} updated, {} duplicates",
            result.duration.as_secs_f64(),
            result.seen,
            result.added,
            result.superseded,
            result.updated,
            result.duplicates
        );
        Ok(result)
    }

    /// Resolve one scanned fileset against the active catalog, in its own
    /// transaction.
    pub fn add_or_update(&self, found: Fileset) -> Result<Reconciled, Error> {
        let tx = self.db.connection().unchecked_transaction()?;
        let storage_id = self.instance.id;

        let outcome = match self.db.find_active_by_md5(storage_id, &found.md5)? {
            Some(mut active) => {
                if is_duplicate(&active, &found) {
                    warn!("skipped duplicate {} keeping {}", found, active);
                    return Ok(Reconciled::Duplicate { kept_id: active.id });
                }
                let changed = active.update_from(&found);
                if changed.is_empty() {
                    Reconciled::Unchanged { id: active.id }
                } else {
                    self.db.update_fileset_location(&active)?;
                    info!("updated {}: {}", changed.join(", "), active);
                    Reconciled::Updated {
                        id: active.id,
                        changed,
                    }
                }
            }
            None => match self
                .db
                .find_active_by_name_type(storage_id, &found.name, &found.fileset_type)?
            {
                Some(active) => {
                    if is_duplicate(&active, &found) {
                        warn!("skipped duplicate {} keeping {}", found, active);
                        return Ok(Reconciled::Duplicate { kept_id: active.id });
                    }
                    self.db.mark_superseded(active.id)?;
                    let stored = self.db.insert_fileset(storage_id, &found)?;
                    info!("{} supersedes {}", stored, active);
                    Reconciled::Superseded {
                        old_id: active.id,
                        new_id: stored.id,
                    }
                }
                None => {
                    if self.config.verify_checksums && !self.verify_content(&found)? {
                        warn!("skipped MD5 mismatch {}", found);
                        return Ok(Reconciled::ChecksumMismatch);
                    }
                    let stored = self.db.insert_fileset(storage_id, &found)?;
                    info!("added new {}", stored);
                    Reconciled::Added { id: stored.id }
                }
            },
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn verify_content(&self, fileset: &Fileset) -> Result<bool, Error> {
        let expected: Vec<(PathBuf, String)> = fileset
            .files
            .iter()
            .map(|f| (fileset.file_path(f), f.md5.clone()))
            .collect();
        let mismatched = checksum::find_mismatches(&expected)?;
        for path in &mismatched {
            debug!("Content of {} does not match its sidecar", path.display());
        }
        Ok(mismatched.is_empty())
    }

    /// Re-check every file of every active fileset. Returns `(lost, found)`.
    pub fn detect_missing(&self) -> Result<(usize, usize), Error> {
        let tx = self.db.connection().unchecked_transaction()?;
        let mut lost = 0;
        let mut found = 0;

        for fileset in self.db.active_filesets(self.instance.id)? {
            for file in &fileset.files {
                // exists() is false for anything we cannot stat, including
                // files removed since the listing.
                let missing = !fileset.file_path(file).exists();
                if missing == file.missing {
                    continue;
                }
                if missing {
                    warn!("Lost file {} of {}", file, fileset);
                    lost += 1;
                } else {
                    info!("Found missing file {} of {}", file, fileset);
                    found += 1;
                }
                self.db.set_file_missing(file.id, missing)?;
            }
        }

        tx.commit()?;
        Ok((lost, found))
    }

    /// Summarize every pending fileset with the format reader for its type.
    ///
    /// Reader failures are recorded on the fileset; they do not stop the batch.
    pub fn read_pending(&self) -> Result<ReadResult, Error> {
        let start = Instant::now();
        let pending = self.db.pending_filesets(self.instance.id)?;
        self.reporter.on_read_start(pending.len());
        let mut result = ReadResult::default();

        for (done, fileset) in pending.iter().enumerate() {
            info!("reading {}", fileset);
            let summary = match self.plugins.format(&fileset.fileset_type) {
                Some(reader) => reader.read(fileset),
                None => Err(Error::UnknownFormat(fileset.fileset_type.clone()).into()),
            };

            let tx = self.db.connection().unchecked_transaction()?;
            match summary {
                Ok(summary) => {
                    self.db.record_read_success(fileset.id, &summary, Utc::now())?;
                    debug!("read {}", fileset);
                    result.succeeded += 1;
                }
                Err(e) => {
                    let mut reason = format!("{:#}", e);
                    if reason.is_empty() {
                        reason = "unknown".to_string();
                    }
                    error!("skipped {} due to read error: {}", fileset, reason);
                    self.db.record_read_failure(fileset.id, &reason, Utc::now())?;
                    result.failed += 1;
                }
            }
            tx.commit()?;
            self.reporter.on_read_progress(done + 1, pending.len());
        }

        result.duration = start.elapsed();
        self.reporter.on_read_complete(
            result.succeeded,
            result.failed,
            result.duration.as_secs_f64(),
        );
        Ok(result)
    }
}

/// The tie-break shared by both match kinds: an incoming fileset whose first
/// file lives elsewhere, while both copies exist, loses to the active one.
fn is_duplicate(active: &Fileset, found: &Fileset) -> bool {
    match (active.first_file_path(), found.first_file_path()) {
        (Some(a), Some(f)) => a != f && a.exists() && f.exists(),
        _ => false,
    }
}

/// Absolute, symlink-free base directories. Ones that cannot be resolved are
/// logged and dropped.
fn resolve_basedirs(basedirs: &[String]) -> Vec<String> {
    basedirs
        .iter()
        .filter_map(|dir| match std::fs::canonicalize(dir) {
            Ok(path) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                error!("Cannot resolve {}, skipping: {}", dir, e);
                None
            }
        })
        .collect()
}
