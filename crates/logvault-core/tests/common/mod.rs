#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use crossbeam_channel::{Receiver, Sender};
use logvault_core::checksum;
use logvault_core::dispatch::Messages;
use logvault_core::jobs::{Job, JobConfig, JobContext, JobDescriptor, TopicSelection};
use logvault_core::storage::models::Fileset;
use logvault_core::{AppConfig, Database, Plugins, Storage};
use serde_json::json;

/// Write `content` to `dir/name` together with a valid `.md5` sidecar.
pub fn write_with_sidecar(dir: &Path, name: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    write_sidecar(&path);
    path
}

/// (Re)write the sidecar of `path` to match its current content.
pub fn write_sidecar(path: &Path) {
    let digest = checksum::md5_file(path).unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    fs::write(
        checksum::sidecar_path(path),
        format!("{}  {}\n", digest, name),
    )
    .unwrap();
}

/// Lines `<ts> <topic> t payload` for each `(ts, topic)`.
pub fn msglog(messages: &[(i64, &str)]) -> String {
    messages
        .iter()
        .map(|(ts, topic)| format!("{} {} t m{}\n", ts, topic, ts))
        .collect()
}

/// An indexed msglog set `basename_0.msglog ..` with one part per entry.
pub fn write_set(dir: &Path, basename: &str, parts: &[&str]) -> Vec<PathBuf> {
    parts
        .iter()
        .enumerate()
        .map(|(i, content)| write_with_sidecar(dir, &format!("{}_{}.msglog", basename, i), content))
        .collect()
}

pub fn config_in(root: &Path) -> AppConfig {
    AppConfig::for_instance(root.join("instance"))
}

pub fn scan(
    db: &Database,
    plugins: &Plugins,
    config: &AppConfig,
    dir: &Path,
) -> logvault_core::ScanResult {
    Storage::open(db, plugins, config)
        .unwrap()
        .scan(dir.to_str().unwrap())
        .unwrap()
}

pub fn scan_and_read(db: &Database, plugins: &Plugins, config: &AppConfig, dir: &Path) {
    let storage = Storage::open(db, plugins, config).unwrap();
    storage.scan(dir.to_str().unwrap()).unwrap();
    storage.read_pending().unwrap();
}

pub fn active(db: &Database) -> Vec<Fileset> {
    let storage = db.ensure_storage().unwrap();
    db.active_filesets(storage.id).unwrap()
}

pub fn boxed(job: impl Job + 'static) -> Box<dyn Job> {
    Box::new(job)
}

/// Emits one `{topic, ts}` record per message. Optionally fails after
/// `fail_after` records.
pub struct RecordingJob {
    descriptor: JobDescriptor,
    fail_after: Option<usize>,
}

impl RecordingJob {
    pub fn new(key: &str, version: &str, topics: &[&str]) -> Self {
        let selection = if topics.is_empty() {
            TopicSelection::All
        } else {
            TopicSelection::topics(topics.iter().copied())
        };
        Self {
            descriptor: JobDescriptor::new(key, version, selection).unwrap(),
            fail_after: None,
        }
    }

    pub fn failing_after(mut self, records: usize) -> Self {
        self.fail_after = Some(records);
        self
    }
}

impl Job for RecordingJob {
    fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    fn run(
        &self,
        ctx: &mut JobContext,
        _fileset: &Fileset,
        messages: &mut Messages,
        _config: &JobConfig,
    ) -> anyhow::Result<()> {
        let mut emitted = 0;
        for message in messages {
            if self.fail_after == Some(emitted) {
                bail!("gave up after {} records", emitted);
            }
            ctx.emit(json!({"topic": message.topic, "ts": message.timestamp}))?;
            emitted += 1;
        }
        Ok(())
    }
}

pub struct PanickingJob {
    descriptor: JobDescriptor,
}

impl PanickingJob {
    pub fn new(key: &str) -> Self {
        Self {
            descriptor: JobDescriptor::new(key, "1.0", TopicSelection::None).unwrap(),
        }
    }
}

impl Job for PanickingJob {
    fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    fn run(
        &self,
        _ctx: &mut JobContext,
        fileset: &Fileset,
        _messages: &mut Messages,
        _config: &JobConfig,
    ) -> anyhow::Result<()> {
        panic!("cannot handle {}", fileset.name);
    }
}

/// Writes one artifact file and records its name.
pub struct ArtifactJob {
    descriptor: JobDescriptor,
}

impl ArtifactJob {
    pub fn new(key: &str) -> Self {
        Self {
            descriptor: JobDescriptor::new(key, "1.0", TopicSelection::None)
                .unwrap()
                .with_param("label", "default"),
        }
    }
}

impl Job for ArtifactJob {
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
        let path = ctx.make_job_file("summary.txt")?;
        fs::write(&path, format!("{} {}\n", fileset.name, config["label"]))?;
        ctx.emit(json!({"label": config["label"]}))?;
        Ok(())
    }
}

/// Reports that its body started, then waits for a go-ahead before emitting
/// one record.
pub struct GatedJob {
    descriptor: JobDescriptor,
    started: Sender<()>,
    go: Receiver<()>,
}

impl GatedJob {
    pub fn new(key: &str, started: Sender<()>, go: Receiver<()>) -> Self {
        Self {
            descriptor: JobDescriptor::new(key, "1.0", TopicSelection::None).unwrap(),
            started,
            go,
        }
    }
}

impl Job for GatedJob {
    fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    fn run(
        &self,
        ctx: &mut JobContext,
        _fileset: &Fileset,
        _messages: &mut Messages,
        _config: &JobConfig,
    ) -> anyhow::Result<()> {
        self.started.send(())?;
        self.go
            .recv_timeout(Duration::from_secs(10))
            .context("no go-ahead")?;
        ctx.emit(json!({"gated": true}))?;
        Ok(())
    }
}
