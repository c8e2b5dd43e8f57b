use thiserror::Error;

use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Job configuration file error: {0}")]
    JobConfigFile(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid job version '{0}'")]
    Version(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("No format reader for fileset type '{0}'")]
    UnknownFormat(String),

    #[error("Job configuration error: {0}")]
    JobConfig(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}
