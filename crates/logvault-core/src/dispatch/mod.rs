//! Job dispatch: select jobs per fileset, run them concurrently over one
//! shared message stream and record every run in the ledger.
//!
//! Filesets are processed one after another. Within a fileset a reader
//! thread fans messages out to one worker per job; workers run on a bounded
//! rayon pool, and their events are written by a collector on the calling
//! thread.

pub mod collector;
pub mod fanout;

pub use collector::{JobOutcome, LedgerEvent};
pub use fanout::{CancelToken, Messages, StreamEnd};

use crate::config::AppConfig;
use crate::error::Error;
use crate::jobs::{Job, JobConfig, JobConfigFile, JobContext, JobVersion};
use crate::plugins::Plugins;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::registry::RegistryKey;
use crate::storage::models::Fileset;
use crate::storage::Database;
use collector::Collector;
use crossbeam_channel::{unbounded, Receiver, Sender};
use fanout::{Envelope, Route};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

static SILENT: SilentReporter = SilentReporter;

#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Run jobs even if a completed run with the same or a newer version exists.
    pub force: bool,
    /// Job keys to consider. `None` means every registered job.
    pub jobs: Option<Vec<String>>,
    /// Restrict to filesets whose name equals, or whose md5 starts with, one
    /// of these.
    pub filesets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub key: String,
    pub version: JobVersion,
    /// Topics routed to this job.
    pub topics: BTreeSet<String>,
    pub config: JobConfig,
}

/// The jobs selected for one fileset.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub fileset: Fileset,
    pub jobs: Vec<PlannedJob>,
}

impl PlanEntry {
    /// Topics the reader has to open: the union over all planned jobs.
    pub fn topics(&self) -> BTreeSet<String> {
        self.jobs
            .iter()
            .flat_map(|j| j.topics.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct DispatchResult {
    pub duration: Duration,
    pub filesets: usize,
    pub outcomes: Vec<JobOutcome>,
    pub cancelled: bool,
}

impl DispatchResult {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded).count()
    }
}

pub struct Dispatcher<'a> {
    db: &'a Database,
    plugins: &'a Plugins,
    job_config: JobConfigFile,
    jobruns_dir: PathBuf,
    pool: ThreadPool,
    cancel: CancelToken,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> Dispatcher<'a> {
    /// Loads job overrides from the instance's `job.toml` and sizes the
    /// worker pool from `max_workers`.
    pub fn new(db: &'a Database, plugins: &'a Plugins, config: &AppConfig) -> Result<Self, Error> {
        let job_config = JobConfigFile::load(&config.job_config_path())?;
        let workers = config.worker_count();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("logvault-job-{}", i))
            .build()?;
        debug!("Job worker pool with {} threads", workers);
        Ok(Self {
            db,
            plugins,
            job_config,
            jobruns_dir: config.jobruns_dir(),
            pool,
            cancel: CancelToken::new(),
            reporter: &SILENT,
        })
    }

    pub fn with_job_config(mut self, job_config: JobConfigFile) -> Self {
        self.job_config = job_config;
        self
    }

    pub fn with_reporter(mut self, reporter: &'a dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Cancelling stops the reader, ends every job's message iteration and
    /// fails jobs still running; filesets not yet started are skipped.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn job_config(&self) -> &JobConfigFile {
        &self.job_config
    }

    fn selected_jobs(&self, options: &DispatchOptions) -> Result<Vec<&'a dyn Job>, Error> {
        match &options.jobs {
            None => Ok(self.plugins.jobs.values().map(|j| j.as_ref()).collect()),
            Some(keys) => {
                let mut seen = HashSet::new();
                keys.iter()
                    .filter(|key| seen.insert(key.as_str()))
                    .map(|key| self.plugins.job(key))
                    .collect()
            }
        }
    }

    /// Decide which jobs run on which filesets without running anything.
    ///
    /// Only active, intact filesets whose read succeeded are eligible. Job
    /// configuration is resolved here, so a bad override fails before any
    /// jobrun exists.
    pub fn plan(&self, options: &DispatchOptions) -> Result<Vec<PlanEntry>, Error> {
        let jobs = self.selected_jobs(options)?;
        let mut configs = Vec::with_capacity(jobs.len());
        for job in &jobs {
            configs.push(self.job_config.resolve(job.descriptor())?);
        }

        let storage = self.db.ensure_storage()?;
        let mut filesets = self.db.readable_filesets(storage.id)?;
        if !options.filesets.is_empty() {
            filesets.retain(|candidate| {
                options
                    .filesets
                    .iter()
                    .any(|wanted| matches_filter(candidate, wanted))
            });
            for wanted in &options.filesets {
                if !filesets
                    .iter()
                    .any(|candidate| matches_filter(candidate, wanted))
                {
                    warn!("No eligible fileset matches '{}'", wanted);
                }
            }
        }

        let mut plan = Vec::new();
        for fileset in filesets {
            let available = self.db.fileset_topic_names(fileset.id)?;
            let completed = if options.force {
                Default::default()
            } else {
                self.db.latest_completed_versions(fileset.id)?
            };

            let mut planned = Vec::new();
            for (job, config) in jobs.iter().zip(&configs) {
                let descriptor = job.descriptor();
                let key = descriptor.key.to_string();
                if let Some(done) = completed.get(&key) {
                    if descriptor.version.as_str() <= done.as_str() {
                        debug!("{} is up to date on {}", key, fileset);
                        continue;
                    }
                }
                if let Some(topics) = descriptor.topics.matched(&available) {
                    planned.push(PlannedJob {
                        key,
                        version: descriptor.version.clone(),
                        topics,
                        config: config.clone(),
                    });
                }
            }

            if planned.is_empty() {
                debug!("No jobs to run on {}", fileset);
            } else {
                plan.push(PlanEntry {
                    fileset,
                    jobs: planned,
                });
            }
        }
        Ok(plan)
    }

    /// Plan and run, one fileset at a time.
    pub fn run(&self, options: &DispatchOptions) -> Result<DispatchResult, Error> {
        let start = Instant::now();
        let plan = self.plan(options)?;
        self.reporter.on_dispatch_start(plan.len());
        let mut result = DispatchResult::default();

        for (i, entry) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Dispatch cancelled, {} fileset(s) not started", plan.len() - i);
                result.cancelled = true;
                break;
            }
            let outcomes = self.run_entry(entry)?;
            result.filesets += 1;
            result.outcomes.extend(outcomes);
        }

        result.duration = start.elapsed();
        self.reporter
            .on_dispatch_complete(result.outcomes.len(), result.duration.as_secs_f64());
        info!(
            "Ran {} job(s) on {} fileset(s): {} succeeded, {} failed",
            result.outcomes.len(),
            result.filesets,
            result.succeeded(),
            result.failed()
        );
        Ok(result)
    }

    /// Finalize jobruns created for a fileset whose jobs never started.
    fn abandon_jobruns(&self, jobrun_ids: &[i64]) {
        for &jobrun_id in jobrun_ids {
            if let Err(e) = self.db.mark_jobrun_failed(jobrun_id) {
                error!("Failed to finalize abandoned jobrun {}: {}", jobrun_id, e);
            }
        }
    }

    fn workdir(&self, key: &RegistryKey, jobrun_id: i64) -> PathBuf {
        let mut dir = self.jobruns_dir.clone();
        if !key.namespace.is_empty() {
            dir.push(&key.namespace);
        }
        dir.push(&key.name);
        dir.push(jobrun_id.to_string());
        dir
    }

    /// Run the planned jobs of one fileset and wait for all of them.
    ///
    /// Every planned job gets an in-flight jobrun before any work starts.
    pub fn run_entry(&self, entry: &PlanEntry) -> Result<Vec<JobOutcome>, Error> {
        let fileset = &entry.fileset;
        self.reporter
            .on_fileset_jobs_start(&fileset.name, entry.jobs.len());

        let jobs = entry
            .jobs
            .iter()
            .map(|planned| self.plugins.job(&planned.key).map(|job| (job, planned)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut jobrun_ids = Vec::with_capacity(jobs.len());
        for (_, planned) in &jobs {
            let created = self.db.create_inflight_jobrun(
                fileset.id,
                &planned.key,
                planned.version.as_str(),
            );
            match created {
                Ok(jobrun_id) => jobrun_ids.push(jobrun_id),
                Err(e) => {
                    self.abandon_jobruns(&jobrun_ids);
                    return Err(e.into());
                }
            }
        }

        let mut collector = Collector::new(self.db, fileset.to_string());
        let mut routes = Vec::with_capacity(jobs.len());
        let mut workers = Vec::with_capacity(jobs.len());
        for ((job, planned), jobrun_id) in jobs.into_iter().zip(jobrun_ids) {
            collector.expect(jobrun_id, fileset.id, &planned.key);
            let (tx, rx) = unbounded();
            routes.push(Route::new(
                format!("{} (jobrun {})", planned.key, jobrun_id),
                planned.topics.clone(),
                tx,
            ));
            workers.push(Worker {
                job,
                config: &planned.config,
                jobrun_id,
                inbox: rx,
                workdir: self.workdir(&job.descriptor().key, jobrun_id),
            });
        }

        let topics = fanout::wanted_topics(&routes);
        let reader = self.plugins.format(&fileset.fileset_type);
        let cancel = &self.cancel;
        let (events_tx, events_rx) = unbounded();

        let outcomes = thread::scope(|s| {
            s.spawn(move || {
                let mut routes = routes;
                let end = if topics.is_empty() {
                    StreamEnd::Complete
                } else {
                    match reader {
                        None => StreamEnd::Aborted(
                            Error::UnknownFormat(fileset.fileset_type.clone()).to_string(),
                        ),
                        Some(reader) => {
                            let pumped = panic::catch_unwind(AssertUnwindSafe(|| {
                                reader
                                    .messages(fileset, &topics)
                                    .map(|stream| fanout::pump(stream, &mut routes, cancel))
                            }));
                            match pumped {
                                Ok(Ok(end)) => end,
                                Ok(Err(e)) => StreamEnd::Aborted(format!("{:#}", e)),
                                Err(payload) => StreamEnd::Aborted(format!(
                                    "message reader panicked: {}",
                                    panic_message(&*payload)
                                )),
                            }
                        }
                    }
                };
                fanout::finish(routes, &end);
            });

            self.pool.in_place_scope(|scope| {
                for worker in workers {
                    let events = events_tx.clone();
                    scope.spawn(move |_| worker.run(fileset, events, cancel));
                }
                drop(events_tx);
                collector.drain(events_rx)
            })
        });

        let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
        self.reporter.on_fileset_jobs_complete(
            &fileset.name,
            succeeded,
            outcomes.len() - succeeded,
        );
        Ok(outcomes)
    }
}

struct Worker<'w> {
    job: &'w dyn Job,
    config: &'w JobConfig,
    jobrun_id: i64,
    inbox: Receiver<Envelope>,
    workdir: PathBuf,
}

impl Worker<'_> {
    fn run(self, fileset: &Fileset, events: Sender<LedgerEvent>, cancel: &CancelToken) {
        let jobrun_id = self.jobrun_id;
        let key = self.job.descriptor().key.clone();
        let _ = events.send(LedgerEvent::Config {
            jobrun_id,
            config: serde_json::Value::Object(self.config.clone()).to_string(),
        });
        info!("Running {} on {}", key, fileset);

        let mut ctx = JobContext::new(jobrun_id, key, self.workdir, cancel.clone(), events.clone());
        let mut messages = Messages::new(self.inbox, cancel.clone());
        let (job, config) = (self.job, self.config);
        let ran = panic::catch_unwind(AssertUnwindSafe(|| {
            job.run(&mut ctx, fileset, &mut messages, config)
        }));

        let outcome = match ran {
            Ok(Ok(())) => match messages.end() {
                Some(StreamEnd::Aborted(reason)) => {
                    Err(format!("message stream aborted: {}", reason))
                }
                _ if cancel.is_cancelled() => Err("cancelled".to_string()),
                _ => Ok(()),
            },
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(payload) => Err(format!("panicked: {}", panic_message(&*payload))),
        };
        drop(messages);
        let _ = events.send(LedgerEvent::Finished { jobrun_id, outcome });
    }
}

fn matches_filter(fileset: &Fileset, wanted: &str) -> bool {
    fileset.name == wanted || (!wanted.is_empty() && fileset.md5.starts_with(wanted))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Result of removing outdated jobruns.
#[derive(Debug, Default)]
pub struct PurgeResult {
    pub jobruns: usize,
    pub directories: usize,
}

/// Delete every jobrun that is not the latest for its (fileset, job), then
/// remove artifact directories that no longer belong to a jobrun.
pub fn purge_jobruns(db: &Database, jobruns_dir: &Path) -> Result<PurgeResult, Error> {
    let purged = db.purge_outdated_jobruns()?;
    for (id, name) in &purged {
        debug!("Purged jobrun {} of {}", id, name);
    }
    let mut result = PurgeResult {
        jobruns: purged.len(),
        directories: 0,
    };
    if !jobruns_dir.is_dir() {
        return Ok(result);
    }

    let live = db.jobrun_ids()?;
    let stale: Vec<PathBuf> = WalkDir::new(jobruns_dir)
        .min_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(|name| name.parse::<i64>().ok())
                .map_or(false, |id| !live.contains(&id))
        })
        .map(|e| e.into_path())
        .collect();
    for dir in &stale {
        fs::remove_dir_all(dir)?;
        result.directories += 1;
    }

    // Empty category directories, deepest first.
    let empty: Vec<PathBuf> = WalkDir::new(jobruns_dir)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    for dir in empty {
        if fs::read_dir(&dir)?.next().is_none() {
            fs::remove_dir(&dir)?;
        }
    }

    info!(
        "Purged {} jobrun(s) and {} stale artifact directories",
        result.jobruns, result.directories
    );
    Ok(result)
}
