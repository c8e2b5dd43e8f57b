use crate::checksum::SIDECAR_SUFFIX;
use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// Candidate file names of one directory, sorted.
///
/// Hidden files and checksum sidecars are never listed.
#[derive(Debug, Clone)]
pub struct DirListing {
    pub dirpath: PathBuf,
    pub filenames: Vec<String>,
}

pub fn compile_ignore_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

fn is_ignored(path: &Path, ignore_patterns: &[Pattern]) -> bool {
    ignore_patterns
        .iter()
        .any(|pattern| pattern.matches_path(path))
}

/// Lazily walk `basedir`, yielding one listing per directory, parents first.
pub fn directory_listings<'a>(
    basedir: &Path,
    ignore_patterns: &'a [Pattern],
) -> impl Iterator<Item = DirListing> + 'a {
    WalkDir::new(basedir)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_entry(move |entry| !is_ignored(entry.path(), ignore_patterns))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                error!("Error walking directory: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(move |entry| match list_directory(entry.path(), ignore_patterns) {
            Ok(listing) => Some(listing),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                error!(
                    "Access denied reading directory {}: {}",
                    entry.path().display(),
                    err
                );
                None
            }
            Err(err) => {
                error!("Error reading directory {}: {}", entry.path().display(), err);
                None
            }
        })
}

fn list_directory(dir: &Path, ignore_patterns: &[Pattern]) -> io::Result<DirListing> {
    debug!("Scanning {}", dir.display());
    let mut filenames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("Skipping non UTF-8 file name {:?} in {}", raw, dir.display());
                continue;
            }
        };
        if name.starts_with('.') || name.ends_with(SIDECAR_SUFFIX) {
            continue;
        }
        if is_ignored(&path, ignore_patterns) {
            continue;
        }
        filenames.push(name);
    }
    filenames.sort();
    Ok(DirListing {
        dirpath: dir.to_path_buf(),
        filenames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;

    #[test]
    fn test_listing_skips_hidden_sidecars_and_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root.join("b.msglog"), "x").unwrap();
        write(root.join("a.msglog"), "x").unwrap();
        write(root.join("a.msglog.md5"), "x").unwrap();
        write(root.join(".hidden"), "x").unwrap();
        fs::create_dir(root.join("tmp")).unwrap();
        write(root.join("tmp").join("c.msglog"), "x").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        write(root.join("sub").join("d.msglog"), "x").unwrap();

        let ignore = compile_ignore_patterns(&["*/tmp".to_string(), "[".to_string()]);
        assert_eq!(ignore.len(), 1);

        let listings: Vec<DirListing> = directory_listings(root, &ignore).collect();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].dirpath, root);
        assert_eq!(listings[0].filenames, vec!["a.msglog", "b.msglog"]);
        assert_eq!(listings[1].dirpath, root.join("sub"));
        assert_eq!(listings[1].filenames, vec!["d.msglog"]);
    }
}
