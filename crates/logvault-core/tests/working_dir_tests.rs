//! Kept in its own test binary: it changes the process working directory.

mod common;

use std::env;
use std::path::Path;

use common::{config_in, msglog, write_set};
use logvault_core::{Database, Plugins, Storage};
use tempfile::tempdir;

#[test]
fn test_relative_basedir_is_stored_absolute() {
    let root = tempdir().unwrap();
    let elsewhere = tempdir().unwrap();
    write_set(
        &root.path().join("data"),
        "drive",
        &[msglog(&[(1, "/a")]).as_str(), msglog(&[(2, "/a")]).as_str()],
    );

    let db = Database::open_in_memory().unwrap();
    let plugins = Plugins::builtin().unwrap();
    let config = config_in(root.path());
    let storage = Storage::open(&db, &plugins, &config).unwrap();

    let previous = env::current_dir().unwrap();
    env::set_current_dir(root.path()).unwrap();
    let scanned = storage.scan_all(&["data".to_string()]).unwrap();
    env::set_current_dir(elsewhere.path()).unwrap();
    let missing = storage.detect_missing();
    env::set_current_dir(previous).unwrap();

    assert_eq!(scanned.added, 1);
    assert_eq!(missing.unwrap(), (0, 0));

    let filesets = common::active(&db);
    assert_eq!(filesets.len(), 1);
    assert!(Path::new(&filesets[0].dirpath).is_absolute());
    assert!(!filesets[0].is_broken());

    // The same directory given absolutely is the same location, not a copy.
    let data = root.path().join("data").canonicalize().unwrap();
    let rescanned = storage
        .scan_all(&[data.to_string_lossy().into_owned()])
        .unwrap();
    assert_eq!(rescanned.unchanged, 1);
    assert_eq!(rescanned.duplicates, 0);
}
