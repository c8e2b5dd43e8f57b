//! Format readers: per fileset type summary extraction and message streams.

pub mod msglog;

pub use msglog::MsglogReader;

use crate::storage::models::Fileset;
use std::collections::{BTreeMap, BTreeSet};

/// One timestamped message of a fileset's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub msg_type: String,
    /// Nanoseconds since the epoch.
    pub timestamp: i64,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSummary {
    pub msg_type: String,
    pub msg_count: u64,
}

/// What a reader learns about a fileset in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSummary {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub topics: BTreeMap<String, TopicSummary>,
}

impl FormatSummary {
    /// Fold one message into the summary. The first type seen for a topic wins.
    pub fn observe(&mut self, message: &Message) {
        self.start_time = Some(
            self.start_time
                .map_or(message.timestamp, |t| t.min(message.timestamp)),
        );
        self.end_time = Some(
            self.end_time
                .map_or(message.timestamp, |t| t.max(message.timestamp)),
        );
        self.topics
            .entry(message.topic.clone())
            .or_insert_with(|| TopicSummary {
                msg_type: message.msg_type.clone(),
                msg_count: 0,
            })
            .msg_count += 1;
    }
}

pub type MessageStream<'a> = Box<dyn Iterator<Item = anyhow::Result<Message>> + Send + 'a>;

pub trait FormatReader: Send + Sync {
    /// Summarize a fileset: time range and per-topic type and count.
    fn read(&self, fileset: &Fileset) -> anyhow::Result<FormatSummary>;

    /// Open the fileset's files in order and stream the messages on `topics`.
    fn messages<'a>(
        &'a self,
        fileset: &'a Fileset,
        topics: &BTreeSet<String>,
    ) -> anyhow::Result<MessageStream<'a>>;
}
