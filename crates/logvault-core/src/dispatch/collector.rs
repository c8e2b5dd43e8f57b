//! Applies worker events to the ledger, one commit per event.
//!
//! The collector runs on the dispatching thread and is the only catalog
//! writer while a fileset's jobs run. Each jobrun is finalized exactly once.

use crate::storage::Database;
use crossbeam_channel::Receiver;
use std::collections::{BTreeMap, HashSet};
use tracing::{error, info};

/// What a worker reports about its jobrun.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    Config { jobrun_id: i64, config: String },
    Result { jobrun_id: i64, record: serde_json::Value },
    File { jobrun_id: i64, name: String },
    Finished { jobrun_id: i64, outcome: Result<(), String> },
}

impl LedgerEvent {
    pub fn jobrun_id(&self) -> i64 {
        match self {
            LedgerEvent::Config { jobrun_id, .. }
            | LedgerEvent::Result { jobrun_id, .. }
            | LedgerEvent::File { jobrun_id, .. }
            | LedgerEvent::Finished { jobrun_id, .. } => *jobrun_id,
        }
    }
}

/// Final state of one jobrun after a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub jobrun_id: i64,
    pub fileset_id: i64,
    pub job: String,
    pub succeeded: bool,
    pub error: Option<String>,
    pub results: usize,
    pub files: usize,
}

pub(crate) struct Collector<'db> {
    db: &'db Database,
    fileset_label: String,
    outcomes: BTreeMap<i64, JobOutcome>,
    finished: HashSet<i64>,
    poisoned: HashSet<i64>,
}

impl<'db> Collector<'db> {
    pub fn new(db: &'db Database, fileset_label: String) -> Self {
        Self {
            db,
            fileset_label,
            outcomes: BTreeMap::new(),
            finished: HashSet::new(),
            poisoned: HashSet::new(),
        }
    }

    pub fn expect(&mut self, jobrun_id: i64, fileset_id: i64, job: &str) {
        self.outcomes.insert(
            jobrun_id,
            JobOutcome {
                jobrun_id,
                fileset_id,
                job: job.to_string(),
                succeeded: false,
                error: None,
                results: 0,
                files: 0,
            },
        );
    }

    /// Apply events until every worker has hung up, then fail any jobrun
    /// that never reported back.
    pub fn drain(mut self, events: Receiver<LedgerEvent>) -> Vec<JobOutcome> {
        for event in events.iter() {
            self.apply(event);
        }

        let unfinished: Vec<i64> = self
            .outcomes
            .keys()
            .filter(|id| !self.finished.contains(id))
            .copied()
            .collect();
        for jobrun_id in unfinished {
            self.finish(jobrun_id, Err("worker exited without reporting".to_string()));
        }
        self.outcomes.into_values().collect()
    }

    fn apply(&mut self, event: LedgerEvent) {
        let jobrun_id = event.jobrun_id();
        if self.finished.contains(&jobrun_id) || !self.outcomes.contains_key(&jobrun_id) {
            error!("Ignoring event for jobrun {} not in flight", jobrun_id);
            return;
        }

        let written = match event {
            LedgerEvent::Config { config, .. } => self.db.record_jobrun_config(jobrun_id, &config),
            LedgerEvent::Result { record, .. } => {
                let seq = self.outcomes.get(&jobrun_id).map_or(0, |o| o.results) as i64;
                let written = self.db.append_job_result(jobrun_id, seq, &record);
                if written.is_ok() {
                    if let Some(o) = self.outcome_mut(jobrun_id) {
                        o.results += 1;
                    }
                }
                written
            }
            LedgerEvent::File { name, .. } => {
                let written = self.db.add_jobfile(jobrun_id, &name).map(|_| ());
                if written.is_ok() {
                    if let Some(o) = self.outcome_mut(jobrun_id) {
                        o.files += 1;
                    }
                }
                written
            }
            LedgerEvent::Finished { outcome, .. } => {
                self.finish(jobrun_id, outcome);
                Ok(())
            }
        };

        if let Err(e) = written {
            error!("Failed to record ledger event for jobrun {}: {}", jobrun_id, e);
            self.poisoned.insert(jobrun_id);
        }
    }

    fn outcome_mut(&mut self, jobrun_id: i64) -> Option<&mut JobOutcome> {
        self.outcomes.get_mut(&jobrun_id)
    }

    fn finish(&mut self, jobrun_id: i64, outcome: Result<(), String>) {
        self.finished.insert(jobrun_id);
        let outcome = match outcome {
            Ok(()) if self.poisoned.contains(&jobrun_id) => {
                Err("ledger write failed while collecting".to_string())
            }
            other => other,
        };

        let label = self
            .outcomes
            .get(&jobrun_id)
            .map(|o| o.job.clone())
            .unwrap_or_default();
        let marked = match &outcome {
            Ok(()) => self.db.mark_jobrun_succeeded(jobrun_id),
            Err(_) => self.db.mark_jobrun_failed(jobrun_id),
        };
        if let Err(e) = marked {
            error!("Failed to finalize jobrun {}: {}", jobrun_id, e);
        }

        match &outcome {
            Ok(()) => info!("{} succeeded on {}", label, self.fileset_label),
            Err(reason) => error!("{} failed on {}: {}", label, self.fileset_label, reason),
        }
        if let Some(o) = self.outcome_mut(jobrun_id) {
            o.succeeded = outcome.is_ok();
            o.error = outcome.err();
        }
    }
}
