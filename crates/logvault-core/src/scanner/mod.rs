//! Fileset discovery: walk base directories, group files with the registered
//! detectors and validate the resulting candidates.

pub mod indexed;
pub mod validate;
pub mod walk;

pub use indexed::IndexedDetector;
pub use validate::{make_file, make_fileset, BrokenFileset};

use crate::storage::models::Fileset;
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One file seen during a scan pass.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileInfo {
    pub dirpath: PathBuf,
    pub name: String,
}

impl FileInfo {
    pub fn path(&self) -> PathBuf {
        self.dirpath.join(&self.name)
    }
}

/// Unvalidated scanner output. `indexed_files` is ordered by index.
#[derive(Debug, Clone)]
pub struct FilesetCandidate {
    pub fileset_type: String,
    pub dirpath: PathBuf,
    pub name: String,
    pub indexed_files: Vec<(u64, FileInfo)>,
}

/// Groups one directory's files into fileset candidates for one format.
pub trait Detector: Send + Sync {
    /// Glob matched against each file's full path before `detect` sees it.
    fn pattern(&self) -> &Pattern;

    fn detect(&self, files: Vec<FileInfo>) -> Vec<FilesetCandidate>;
}

fn detect_in_directory(
    listing: &walk::DirListing,
    detectors: &[&dyn Detector],
) -> Vec<FilesetCandidate> {
    let mut candidates = Vec::new();
    for detector in detectors {
        let files: Vec<FileInfo> = listing
            .filenames
            .iter()
            .map(|name| FileInfo {
                dirpath: listing.dirpath.clone(),
                name: name.clone(),
            })
            .filter(|info| detector.pattern().matches_path(&info.path()))
            .collect();
        if !files.is_empty() {
            candidates.extend(detector.detect(files));
        }
    }
    candidates
}

/// Lazily yield the fileset candidates below `basedir`.
///
/// Every detector sees every directory; a file may take part in at most one
/// candidate per detector.
pub fn detect<'a>(
    basedir: &Path,
    detectors: &'a [&'a dyn Detector],
    ignore_patterns: &'a [Pattern],
) -> impl Iterator<Item = FilesetCandidate> + 'a {
    walk::directory_listings(basedir, ignore_patterns)
        .flat_map(move |listing| detect_in_directory(&listing, detectors))
}

/// Lazily yield validated filesets below `basedir`, logging broken ones.
pub fn scan<'a>(
    basedir: &Path,
    detectors: &'a [&'a dyn Detector],
    ignore_patterns: &'a [Pattern],
) -> impl Iterator<Item = Fileset> + 'a {
    detect(basedir, detectors, ignore_patterns).filter_map(|candidate| {
        match make_fileset(&candidate) {
            Ok(fileset) => Some(fileset),
            Err(broken) => {
                warn!("{}", broken);
                None
            }
        }
    })
}
