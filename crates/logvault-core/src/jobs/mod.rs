pub mod builtin;
pub mod config;
pub mod context;
pub mod version;

pub use config::{ConfigParam, JobConfig, JobConfigFile};
pub use context::JobContext;
pub use version::JobVersion;

use crate::dispatch::Messages;
use crate::error::Error;
use crate::registry::RegistryKey;
use crate::storage::models::Fileset;
use std::collections::BTreeSet;

/// Which messages a job wants to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSelection {
    /// Topic independent: the job runs on every fileset and gets no messages.
    None,
    /// Every topic the fileset has.
    All,
    Topics(BTreeSet<String>),
}

impl TopicSelection {
    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TopicSelection::Topics(topics.into_iter().map(Into::into).collect())
    }

    /// The topics to route to this job on a fileset carrying `available`,
    /// or `None` if the job does not apply to that fileset.
    pub fn matched(&self, available: &BTreeSet<String>) -> Option<BTreeSet<String>> {
        match self {
            TopicSelection::None => Some(BTreeSet::new()),
            TopicSelection::All if available.is_empty() => None,
            TopicSelection::All => Some(available.clone()),
            TopicSelection::Topics(wanted) => {
                let common: BTreeSet<String> = wanted.intersection(available).cloned().collect();
                (!common.is_empty()).then_some(common)
            }
        }
    }
}

/// Static description of a job: identity, version, interest and parameters.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub key: RegistryKey,
    pub version: JobVersion,
    pub topics: TopicSelection,
    pub params: Vec<ConfigParam>,
    pub description: String,
}

impl JobDescriptor {
    /// `key` is the dotted `namespace.name`.
    pub fn new(key: &str, version: &str, topics: TopicSelection) -> Result<Self, Error> {
        Ok(Self {
            key: RegistryKey::parse(key),
            version: JobVersion::parse(version)?,
            topics,
            params: Vec::new(),
            description: String::new(),
        })
    }

    pub fn with_param(mut self, name: &str, default: impl Into<serde_json::Value>) -> Self {
        self.params.push(ConfigParam {
            name: name.to_string(),
            default: default.into(),
        });
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// A job body run once per (fileset, job) pair.
///
/// Returning an error or panicking fails only this job's jobrun.
pub trait Job: Send + Sync {
    fn descriptor(&self) -> &JobDescriptor;

    fn run(
        &self,
        ctx: &mut JobContext,
        fileset: &Fileset,
        messages: &mut Messages,
        config: &JobConfig,
    ) -> anyhow::Result<()>;
}
