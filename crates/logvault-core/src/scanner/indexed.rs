//! Detector for formats split into `<basename>[_<index>].<ext>` parts.

use super::{Detector, FileInfo, FilesetCandidate};
use glob::Pattern;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

pub struct IndexedDetector {
    fileset_type: String,
    extension: String,
    pattern: Pattern,
}

impl IndexedDetector {
    /// A detector for `*.<extension>` files producing filesets of `fileset_type`.
    pub fn new(fileset_type: &str, extension: &str) -> Result<Self, glob::PatternError> {
        Ok(Self {
            fileset_type: fileset_type.to_string(),
            extension: extension.to_string(),
            pattern: Pattern::new(&format!("*.{}", extension))?,
        })
    }

    /// Split `run_3.msglog` into `("run", Some(3))`, `run.msglog` into `("run", None)`.
    pub fn split_name<'n>(&self, name: &'n str) -> Option<(&'n str, Option<u64>)> {
        let stem = name.strip_suffix(&format!(".{}", self.extension))?;
        if let Some((basename, index)) = stem.rsplit_once('_') {
            if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(idx) = index.parse::<u64>() {
                    return Some((basename, Some(idx)));
                }
            }
        }
        Some((stem, None))
    }

    fn candidate(
        &self,
        dirpath: PathBuf,
        name: &str,
        indexed_files: Vec<(u64, FileInfo)>,
    ) -> FilesetCandidate {
        FilesetCandidate {
            fileset_type: self.fileset_type.clone(),
            dirpath,
            name: name.to_string(),
            indexed_files,
        }
    }
}

impl Detector for IndexedDetector {
    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn detect(&self, files: Vec<FileInfo>) -> Vec<FilesetCandidate> {
        let mut candidates = Vec::new();
        let mut groups: BTreeMap<(PathBuf, String), Vec<(u64, FileInfo)>> = BTreeMap::new();

        for info in files {
            let (basename, idx) = match self.split_name(&info.name) {
                Some((basename, idx)) => (basename.to_string(), idx),
                None => continue,
            };
            match idx {
                None => {
                    let dirpath = info.dirpath.clone();
                    candidates.push(self.candidate(dirpath, &basename, vec![(0, info)]));
                }
                Some(idx) => groups
                    .entry((info.dirpath.clone(), basename))
                    .or_default()
                    .push((idx, info)),
            }
        }

        // Walk each group from the highest index down. A gap discards what has
        // been collected so far; reaching index 0 closes a set.
        for ((dirpath, basename), mut members) in groups {
            members.sort_by(|a, b| b.0.cmp(&a.0));
            let mut run: Vec<(u64, FileInfo)> = Vec::new();
            let mut prev: Option<u64> = None;

            for (idx, info) in members {
                if let Some(prev_idx) = prev {
                    if prev_idx == 0 || idx != prev_idx - 1 {
                        if !run.is_empty() {
                            debug!(
                                "Discarding {} part(s) of {} in {} after gap",
                                run.len(),
                                basename,
                                dirpath.display()
                            );
                        }
                        run.clear();
                    }
                }
                run.push((idx, info));
                if idx == 0 {
                    run.reverse();
                    candidates.push(self.candidate(
                        dirpath.clone(),
                        &basename,
                        std::mem::take(&mut run),
                    ));
                    prev = None;
                } else {
                    prev = Some(idx);
                }
            }
        }

        candidates
    }
}
