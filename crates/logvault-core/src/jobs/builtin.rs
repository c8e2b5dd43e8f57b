use super::{Job, JobConfig, JobContext, JobDescriptor, TopicSelection};
use crate::dispatch::Messages;
use crate::error::Error;
use crate::storage::models::Fileset;
use anyhow::Context;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};

pub const TOPIC_STATS_JOB: &str = "core.topic_stats";
pub const FILESET_INFO_JOB: &str = "core.fileset_info";

#[derive(Debug, Default)]
struct TopicStats {
    msg_type: String,
    count: u64,
    first: i64,
    last: i64,
}

/// Per-topic message counts and time range, one record per topic.
pub struct TopicStatsJob {
    descriptor: JobDescriptor,
}

impl TopicStatsJob {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            descriptor: JobDescriptor::new(TOPIC_STATS_JOB, "1.0", TopicSelection::All)?
                .with_param("min_count", 0)
                .with_param("write_table", false)
                .with_description("Message count and time range per topic"),
        })
    }
}

impl Job for TopicStatsJob {
    fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    fn run(
        &self,
        ctx: &mut JobContext,
        _fileset: &Fileset,
        messages: &mut Messages,
        config: &JobConfig,
    ) -> anyhow::Result<()> {
        let min_count = config
            .get("min_count")
            .and_then(|v| v.as_u64())
            .context("min_count must be a non-negative integer")?;
        let write_table = config
            .get("write_table")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut stats: BTreeMap<String, TopicStats> = BTreeMap::new();
        for message in messages {
            let entry = stats
                .entry(message.topic.clone())
                .or_insert_with(|| TopicStats {
                    msg_type: message.msg_type.clone(),
                    first: message.timestamp,
                    last: message.timestamp,
                    ..TopicStats::default()
                });
            entry.count += 1;
            entry.first = entry.first.min(message.timestamp);
            entry.last = entry.last.max(message.timestamp);
        }

        let kept: Vec<(&String, &TopicStats)> =
            stats.iter().filter(|(_, s)| s.count >= min_count).collect();
        for (topic, s) in &kept {
            ctx.emit(json!({
                "topic": topic,
                "msg_type": s.msg_type,
                "count": s.count,
                "first": s.first,
                "last": s.last,
            }))?;
        }

        if write_table {
            let path = ctx.make_job_file("topics.tsv")?;
            let mut out = BufWriter::new(OpenOptions::new().write(true).open(&path)?);
            writeln!(out, "topic\tmsg_type\tcount\tfirst\tlast")?;
            for (topic, s) in &kept {
                writeln!(out, "{}\t{}\t{}\t{}\t{}", topic, s.msg_type, s.count, s.first, s.last)?;
            }
            out.flush()?;
        }
        Ok(())
    }
}

/// Location and shape of a fileset; needs no messages.
pub struct FilesetInfoJob {
    descriptor: JobDescriptor,
}

impl FilesetInfoJob {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            descriptor: JobDescriptor::new(FILESET_INFO_JOB, "1.0", TopicSelection::None)?
                .with_param("include_sizes", false)
                .with_description("Directory, name and file count of a fileset"),
        })
    }
}

impl Job for FilesetInfoJob {
    fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    fn run(
        &self,
        ctx: &mut JobContext,
        fileset: &Fileset,
        _messages: &mut Messages,
        config: &JobConfig,
    ) -> anyhow::Result<()> {
        let mut record = json!({
            "name": fileset.name,
            "dirpath": fileset.dirpath,
            "type": fileset.fileset_type,
            "files": fileset.files.len(),
        });
        let include_sizes = config
            .get("include_sizes")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if include_sizes {
            let sizes: Vec<i64> = fileset.files.iter().map(|f| f.size).collect();
            record["sizes"] = json!(sizes);
            record["total_size"] = json!(sizes.iter().sum::<i64>());
        }
        ctx.emit(record)?;
        Ok(())
    }
}
