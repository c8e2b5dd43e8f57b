//! Job parameter resolution: declared defaults overridden by `job.toml`.
//!
//! A job's section is its dotted key, written either as nested tables
//! (`[core.topic_stats]`) or as one quoted key (`["core.topic_stats"]`).
//! The `[job]` section may name the default job list.

use super::JobDescriptor;
use crate::error::Error;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Effective parameters handed to a job body and recorded on its jobrun.
pub type JobConfig = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigParam {
    pub name: String,
    pub default: Value,
}

#[derive(Debug, Clone, Default)]
pub struct JobConfigFile {
    table: toml::Table,
}

impl JobConfigFile {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        Ok(Self {
            table: text.parse::<toml::Table>()?,
        })
    }

    /// Load the override file. A missing file means no overrides.
    pub fn load(path: &Path) -> Result<Self, Error> {
        match fs::read_to_string(path) {
            Ok(text) => {
                debug!("Loaded job configuration from {}", path.display());
                Self::parse(&text)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::empty()),
            Err(e) => Err(e.into()),
        }
    }

    fn section(&self, key: &str) -> Option<&toml::Table> {
        if let Some(toml::Value::Table(table)) = self.table.get(key) {
            return Some(table);
        }
        let mut current = &self.table;
        for part in key.split('.') {
            match current.get(part) {
                Some(toml::Value::Table(table)) => current = table,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Job keys listed under `[job] list`, as a string of whitespace
    /// separated keys or an array.
    pub fn job_list(&self) -> Vec<String> {
        let list = match self.table.get("job") {
            Some(toml::Value::Table(job)) => job.get("list"),
            _ => None,
        };
        match list {
            Some(toml::Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
            Some(toml::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Defaults of the job's declared parameters, overridden by its section.
    ///
    /// A key in the section that the job does not declare is an error.
    /// Nested tables are sections of other jobs and are skipped.
    pub fn resolve(&self, descriptor: &JobDescriptor) -> Result<JobConfig, Error> {
        let mut config = JobConfig::new();
        for param in &descriptor.params {
            config.insert(param.name.clone(), param.default.clone());
        }

        let key = descriptor.key.to_string();
        if let Some(section) = self.section(&key) {
            for (name, value) in section {
                if value.is_table() {
                    continue;
                }
                if !config.contains_key(name) {
                    return Err(Error::JobConfig(format!(
                        "unknown parameter '{}' for job {}",
                        name, key
                    )));
                }
                config.insert(name.clone(), to_json(value));
            }
        }
        Ok(config)
    }
}

fn to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::from(*i),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}
