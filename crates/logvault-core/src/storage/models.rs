use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

pub const SUPERSEDED_REASON: &str = "__superseded__";

/// The single storage instance owning all filesets of a catalog.
#[derive(Debug, Clone)]
pub struct StorageInstance {
    pub id: i64,
    pub uuid: String,
}

/// One physical file of a fileset. Owned by its fileset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub id: i64,
    pub fileset_id: i64,
    pub idx: i64,
    pub name: String,
    pub md5: String,
    pub size: i64,
    pub missing: bool,
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<File \"{}\" md5=\"{}\" size={}>",
            self.name, self.md5, self.size
        )
    }
}

/// One logical recording: an ordered group of files in one directory.
///
/// Scanner output uses the same type with `id == 0` until it is inserted.
#[derive(Debug, Clone)]
pub struct Fileset {
    pub id: i64,
    pub storage_id: i64,
    pub md5: String,
    pub name: String,
    pub dirpath: String,
    pub fileset_type: String,
    pub files: Vec<File>,
    pub deleted: bool,
    pub deleted_reason: Option<String>,
    pub time_added: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
    pub time_read: Option<DateTime<Utc>>,
    pub read_succeeded: Option<bool>,
    pub read_error: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl Fileset {
    pub fn file_path(&self, file: &File) -> PathBuf {
        Path::new(&self.dirpath).join(&file.name)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| self.file_path(f)).collect()
    }

    pub fn first_file_path(&self) -> Option<PathBuf> {
        self.files.first().map(|f| self.file_path(f))
    }

    pub fn is_intact(&self) -> bool {
        !self.files.iter().any(|f| f.missing)
    }

    pub fn is_pending(&self) -> bool {
        self.time_read.is_none()
    }

    pub fn is_broken(&self) -> bool {
        !self.deleted && !self.is_intact()
    }

    /// Adopt location attributes of `other` (same content identity).
    ///
    /// Returns the names of the changed attributes. When anything changed the
    /// file list is replaced and `time_updated` is bumped.
    pub fn update_from(&mut self, other: &Fileset) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.name != other.name {
            self.name = other.name.clone();
            changed.push("name");
        }
        if self.dirpath != other.dirpath {
            self.dirpath = other.dirpath.clone();
            changed.push("dirpath");
        }
        if self.fileset_type != other.fileset_type {
            self.fileset_type = other.fileset_type.clone();
            changed.push("type");
        }
        if !changed.is_empty() {
            self.files = other
                .files
                .iter()
                .map(|f| File {
                    id: 0,
                    fileset_id: self.id,
                    missing: false,
                    ..f.clone()
                })
                .collect();
            self.time_updated = Utc::now();
        }
        changed
    }
}

impl fmt::Display for Fileset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Fileset \"{}\" type=\"{}\" dir=\"{}\" files={} md5=\"{}\">",
            self.name,
            self.fileset_type,
            self.dirpath,
            self.files.len(),
            self.md5
        )
    }
}

/// Per-topic summary row written by a format reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesetTopic {
    pub fileset_id: i64,
    pub topic: String,
    pub msg_type: String,
    pub msg_count: i64,
}

/// One execution attempt of one job against one fileset.
#[derive(Debug, Clone)]
pub struct Jobrun {
    pub id: i64,
    pub fileset_id: i64,
    pub name: String,
    pub version: String,
    pub config: Option<String>,
    pub failed: Option<bool>,
    pub succeeded: Option<bool>,
}

impl Jobrun {
    pub fn is_in_flight(&self) -> bool {
        self.failed.is_none() && self.succeeded.is_none()
    }

    pub fn is_completed(&self) -> bool {
        self.failed == Some(true) || self.succeeded == Some(true)
    }
}

/// A side artifact file produced by a job.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub id: i64,
    pub jobrun_id: i64,
    pub name: String,
}
