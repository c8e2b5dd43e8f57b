//! MD5 helpers: streaming file hashes, `.md5` sidecars and fileset identity.

use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

pub const SIDECAR_SUFFIX: &str = ".md5";

const READ_BUFFER_SIZE: usize = 64 * 1024;
const MD5_HEX_LEN: usize = 32;

pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(SIDECAR_SUFFIX);
    PathBuf::from(os)
}

/// Hash a file's full content without loading it into memory.
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, File::open(path)?);
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Fileset identity: one md5 over the concatenated hex digests of its files.
///
/// Order, content and count matter; file names do not.
pub fn fileset_md5<'a, I>(file_md5s: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut context = md5::Context::new();
    for md5 in file_md5s {
        context.consume(md5.as_bytes());
    }
    format!("{:x}", context.compute())
}

/// Parse the first line of a sidecar: exactly `<32 hex><two spaces><filename>`.
///
/// Returns the lowercased digest, or `None` for anything else.
pub fn parse_sidecar(content: &str, filename: &str) -> Option<String> {
    let line = content.lines().next()?;
    if line.len() < MD5_HEX_LEN + 2 || !line.is_char_boundary(MD5_HEX_LEN) {
        return None;
    }
    let (digest, rest) = line.split_at(MD5_HEX_LEN);
    if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match rest.strip_prefix("  ") {
        Some(name) if name == filename => Some(digest.to_ascii_lowercase()),
        _ => None,
    }
}

/// Hash the given files in parallel and return those whose content does not
/// match the expected digest.
pub fn find_mismatches(expected: &[(PathBuf, String)]) -> io::Result<Vec<PathBuf>> {
    let results: Vec<io::Result<Option<PathBuf>>> = expected
        .par_iter()
        .map(|(path, md5)| {
            let actual = md5_file(path)?;
            Ok((actual != *md5).then(|| path.clone()))
        })
        .collect();

    let mut mismatched = Vec::new();
    for result in results {
        if let Some(path) = result? {
            mismatched.push(path);
        }
    }
    Ok(mismatched)
}
