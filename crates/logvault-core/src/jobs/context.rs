use crate::dispatch::collector::LedgerEvent;
use crate::dispatch::CancelToken;
use crate::error::Error;
use crate::registry::RegistryKey;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything a job body may know about the jobrun it is executing.
///
/// Results and artifact files are reported through the context; they reach
/// the ledger via the dispatch collector in the order they were produced.
pub struct JobContext {
    jobrun_id: i64,
    key: RegistryKey,
    workdir: PathBuf,
    cancel: CancelToken,
    events: Sender<LedgerEvent>,
    files: HashSet<String>,
}

impl JobContext {
    pub(crate) fn new(
        jobrun_id: i64,
        key: RegistryKey,
        workdir: PathBuf,
        cancel: CancelToken,
        events: Sender<LedgerEvent>,
    ) -> Self {
        Self {
            jobrun_id,
            key,
            workdir,
            cancel,
            events,
            files: HashSet::new(),
        }
    }

    /// A context whose events are returned to the caller instead of being
    /// written to a ledger.
    pub fn detached(
        jobrun_id: i64,
        key: RegistryKey,
        workdir: PathBuf,
    ) -> (Self, Receiver<LedgerEvent>) {
        let (tx, rx) = unbounded();
        (
            Self::new(jobrun_id, key, workdir, CancelToken::new(), tx),
            rx,
        )
    }

    pub fn jobrun_id(&self) -> i64 {
        self.jobrun_id
    }

    pub fn key(&self) -> &RegistryKey {
        &self.key
    }

    /// Directory holding this jobrun's artifact files. Created on first use.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record one result row for this jobrun.
    pub fn emit(&mut self, record: serde_json::Value) -> Result<(), Error> {
        self.send(LedgerEvent::Result {
            jobrun_id: self.jobrun_id,
            record,
        })
    }

    /// Create an empty artifact file for this jobrun and return its path.
    ///
    /// Names are plain file names, unique within the jobrun.
    pub fn make_job_file(&mut self, name: &str) -> Result<PathBuf, Error> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
        {
            return Err(Error::Other(format!("invalid job file name '{}'", name)));
        }
        if self.files.contains(name) {
            return Err(Error::Other(format!(
                "job file '{}' already exists for jobrun {}",
                name, self.jobrun_id
            )));
        }

        fs::create_dir_all(&self.workdir)?;
        let path = self.workdir.join(name);
        OpenOptions::new().write(true).create_new(true).open(&path)?;
        self.files.insert(name.to_string());
        debug!("Created job file {}", path.display());

        self.send(LedgerEvent::File {
            jobrun_id: self.jobrun_id,
            name: name.to_string(),
        })?;
        Ok(path)
    }

    pub(crate) fn send(&self, event: LedgerEvent) -> Result<(), Error> {
        self.events
            .send(event)
            .map_err(|_| Error::Other("ledger collector is gone".to_string()))
    }
}
