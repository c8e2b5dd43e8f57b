use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_INSTANCE_PATH: &str = "./instance";
const DB_FILE_NAME: &str = "catalog.db";
const JOB_CONFIG_FILE_NAME: &str = "job.toml";
const JOBRUNS_DIR_NAME: &str = "jobruns";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub root_paths: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_instance_path")]
    pub instance_path: String,
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default = "default_verify_checksums")]
    pub verify_checksums: bool,
}

fn default_instance_path() -> String {
    DEFAULT_INSTANCE_PATH.to_string()
}

fn default_verify_checksums() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_paths: Vec::new(),
            ignore_patterns: Vec::new(),
            instance_path: default_instance_path(),
            db_path: None,
            max_workers: None,
            verify_checksums: default_verify_checksums(),
        }
    }
}

impl AppConfig {
    /// Config for a self-contained instance directory, used by tests and `init`.
    pub fn for_instance(instance_path: impl AsRef<Path>) -> Self {
        Self {
            instance_path: instance_path.as_ref().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    pub fn instance_dir(&self) -> PathBuf {
        PathBuf::from(&self.instance_path)
    }

    pub fn db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => PathBuf::from(path),
            None => self.instance_dir().join(DB_FILE_NAME),
        }
    }

    pub fn job_config_path(&self) -> PathBuf {
        self.instance_dir().join(JOB_CONFIG_FILE_NAME)
    }

    pub fn jobruns_dir(&self) -> PathBuf {
        self.instance_dir().join(JOBRUNS_DIR_NAME)
    }

    pub fn worker_count(&self) -> usize {
        self.max_workers
            .filter(|&n| n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("LOGVAULT")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("root_paths")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Drop every directory nested in (or equal to) another one in the list.
/// Shallower directories come first in the result.
pub fn non_overlapping_directories(mut dirs: Vec<String>) -> Vec<String> {
    dirs.sort_by_key(|dir| Path::new(dir).components().count());

    let mut kept: Vec<String> = Vec::with_capacity(dirs.len());
    for dir in dirs {
        if !kept.iter().any(|outer| Path::new(&dir).starts_with(outer)) {
            kept.push(dir);
        }
    }
    kept
}
