use super::{FileInfo, FilesetCandidate};
use crate::checksum::{fileset_md5, parse_sidecar, sidecar_path};
use crate::storage::models::{File, Fileset};
use chrono::Utc;
use std::fs;
use thiserror::Error;

/// Reasons a candidate cannot become a catalog fileset.
///
/// A broken candidate is logged and skipped; it never aborts a scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokenFileset {
    #[error("UnreadableFile: {name} in {dirpath}")]
    UnreadableFile { dirpath: String, name: String },

    #[error("MissingMD5: {name} in {dirpath}")]
    MissingMd5 { dirpath: String, name: String },

    #[error("MalformattedMD5: {name} in {dirpath}")]
    MalformattedMd5 { dirpath: String, name: String },

    #[error("EmptyFile: {name} in {dirpath}")]
    EmptyFile { dirpath: String, name: String },

    #[error("MissingFile: {count} file(s) of {name} in {dirpath}")]
    MissingFile {
        dirpath: String,
        name: String,
        count: u64,
    },
}

/// Build a catalog `File` from a scanned file, trusting its sidecar checksum.
///
/// Checks run in a fixed order: readability, sidecar presence, sidecar
/// format, then size.
pub fn make_file(info: &FileInfo, idx: u64) -> Result<File, BrokenFileset> {
    let path = info.path();
    let dirpath = info.dirpath.to_string_lossy().into_owned();
    let name = info.name.clone();

    if fs::File::open(&path).is_err() {
        return Err(BrokenFileset::UnreadableFile { dirpath, name });
    }

    let raw = match fs::read(sidecar_path(&path)) {
        Ok(raw) => raw,
        Err(_) => return Err(BrokenFileset::MissingMd5 { dirpath, name }),
    };
    let md5 = match std::str::from_utf8(&raw)
        .ok()
        .and_then(|content| parse_sidecar(content, &info.name))
    {
        Some(md5) => md5,
        None => return Err(BrokenFileset::MalformattedMd5 { dirpath, name }),
    };

    let size = match fs::metadata(&path) {
        Ok(metadata) => metadata.len(),
        Err(_) => return Err(BrokenFileset::UnreadableFile { dirpath, name }),
    };
    if size == 0 {
        return Err(BrokenFileset::EmptyFile { dirpath, name });
    }

    Ok(File {
        id: 0,
        fileset_id: 0,
        idx: idx as i64,
        name,
        md5,
        size: size as i64,
        missing: false,
    })
}

/// Validate every file of a candidate and compute the fileset identity.
pub fn make_fileset(candidate: &FilesetCandidate) -> Result<Fileset, BrokenFileset> {
    let mut files = Vec::with_capacity(candidate.indexed_files.len());
    for (position, (_, info)) in candidate.indexed_files.iter().enumerate() {
        files.push(make_file(info, position as u64)?);
    }

    let expected = candidate
        .indexed_files
        .last()
        .map(|(idx, _)| idx + 1)
        .unwrap_or(1);
    let missing = expected.saturating_sub(files.len() as u64);
    if missing > 0 {
        let dirpath = candidate
            .indexed_files
            .first()
            .map(|(_, info)| info.dirpath.clone())
            .unwrap_or_else(|| candidate.dirpath.clone());
        return Err(BrokenFileset::MissingFile {
            dirpath: dirpath.to_string_lossy().into_owned(),
            name: candidate.name.clone(),
            count: missing,
        });
    }

    let now = Utc::now();
    Ok(Fileset {
        id: 0,
        storage_id: 0,
        md5: fileset_md5(files.iter().map(|f| f.md5.as_str())),
        name: candidate.name.clone(),
        dirpath: candidate.dirpath.to_string_lossy().into_owned(),
        fileset_type: candidate.fileset_type.clone(),
        files,
        deleted: false,
        deleted_reason: None,
        time_added: now,
        time_updated: now,
        time_read: None,
        read_succeeded: None,
        read_error: None,
        start_time: None,
        end_time: None,
    })
}
