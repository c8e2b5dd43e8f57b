//! Plain-text message logs.
//!
//! One message per line: `<timestamp_ns> <topic> <msg_type> [payload...]`.
//! Blank lines and lines starting with `#` are skipped.

use super::{FormatReader, FormatSummary, Message, MessageStream};
use crate::storage::models::Fileset;
use anyhow::{bail, Context};
use std::collections::{BTreeSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;

pub const MSGLOG_TYPE: &str = "msglog";
pub const MSGLOG_EXTENSION: &str = "msglog";

pub fn parse_line(line: &str) -> anyhow::Result<Option<Message>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut fields = line.splitn(4, ' ');
    let (ts, topic, msg_type) = match (fields.next(), fields.next(), fields.next()) {
        (Some(ts), Some(topic), Some(msg_type)) if !topic.is_empty() && !msg_type.is_empty() => {
            (ts, topic, msg_type)
        }
        _ => bail!("expected '<timestamp> <topic> <type> [payload]'"),
    };
    let timestamp = ts
        .parse::<i64>()
        .with_context(|| format!("invalid timestamp '{}'", ts))?;
    Ok(Some(Message {
        topic: topic.to_string(),
        msg_type: msg_type.to_string(),
        timestamp,
        payload: fields.next().unwrap_or_default().to_string(),
    }))
}

struct OpenFile {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    lineno: usize,
}

/// Concatenated messages of a fileset's files, in file then line order.
pub struct MsglogMessages {
    pending: VecDeque<PathBuf>,
    current: Option<OpenFile>,
    topics: Option<BTreeSet<String>>,
    failed: bool,
}

impl MsglogMessages {
    pub fn new(paths: Vec<PathBuf>, topics: Option<BTreeSet<String>>) -> Self {
        Self {
            pending: paths.into(),
            current: None,
            topics,
            failed: false,
        }
    }

    fn wanted(&self, message: &Message) -> bool {
        self.topics
            .as_ref()
            .map_or(true, |topics| topics.contains(&message.topic))
    }

    fn next_message(&mut self) -> anyhow::Result<Option<Message>> {
        loop {
            let file = match self.current.as_mut() {
                Some(file) => file,
                None => match self.pending.pop_front() {
                    Some(path) => {
                        let handle = File::open(&path)
                            .with_context(|| format!("cannot open {}", path.display()))?;
                        self.current.insert(OpenFile {
                            path,
                            lines: BufReader::new(handle).lines(),
                            lineno: 0,
                        })
                    }
                    None => return Ok(None),
                },
            };

            match file.lines.next() {
                None => self.current = None,
                Some(line) => {
                    file.lineno += 1;
                    let line = line
                        .with_context(|| format!("cannot read {}", file.path.display()))?;
                    let parsed = parse_line(&line).with_context(|| {
                        format!("{}:{}", file.path.display(), file.lineno)
                    })?;
                    if let Some(message) = parsed {
                        if self.wanted(&message) {
                            return Ok(Some(message));
                        }
                    }
                }
            }
        }
    }
}

impl Iterator for MsglogMessages {
    type Item = anyhow::Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_message() {
            Ok(message) => message.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MsglogReader;

impl FormatReader for MsglogReader {
    fn read(&self, fileset: &Fileset) -> anyhow::Result<FormatSummary> {
        let mut summary = FormatSummary::default();
        for message in MsglogMessages::new(fileset.paths(), None) {
            summary.observe(&message?);
        }
        Ok(summary)
    }

    fn messages<'a>(
        &'a self,
        fileset: &'a Fileset,
        topics: &BTreeSet<String>,
    ) -> anyhow::Result<MessageStream<'a>> {
        Ok(Box::new(MsglogMessages::new(
            fileset.paths(),
            Some(topics.clone()),
        )))
    }
}
