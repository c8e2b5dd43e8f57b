//! Job run ledger: the durable record of every job execution attempt.
//!
//! A jobrun is created in-flight (`failed` and `succeeded` both NULL) before
//! its job starts, and is finalized exactly once. Finalizing an already
//! finalized jobrun is a no-op.

use super::models::{JobFile, Jobrun};
use super::sqlite::Database;
use crate::error::Error;
use rusqlite::{params, OptionalExtension, Result, Row};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const JOBRUN_COLUMNS: &str = "id, fileset_id, name, version, config, failed, succeeded";

fn row_to_jobrun(row: &Row<'_>) -> Result<Jobrun> {
    Ok(Jobrun {
        id: row.get(0)?,
        fileset_id: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        config: row.get(4)?,
        failed: row.get(5)?,
        succeeded: row.get(6)?,
    })
}

impl Database {
    pub fn create_inflight_jobrun(
        &self,
        fileset_id: i64,
        name: &str,
        version: &str,
    ) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO jobrun (fileset_id, name, version) VALUES (?1, ?2, ?3)",
            params![fileset_id, name, version],
        )?;
        let id = self.connection().last_insert_rowid();
        debug!("Created jobrun {} for {} on fileset {}", id, name, fileset_id);
        Ok(id)
    }

    pub fn record_jobrun_config(&self, jobrun_id: i64, config: &str) -> Result<()> {
        self.connection().execute(
            "UPDATE jobrun SET config = ?1 WHERE id = ?2",
            params![config, jobrun_id],
        )?;
        Ok(())
    }

    pub fn append_job_result(
        &self,
        jobrun_id: i64,
        seq: i64,
        record: &serde_json::Value,
    ) -> Result<()> {
        self.connection()
            .prepare_cached("INSERT INTO job_result (jobrun_id, seq, record) VALUES (?1, ?2, ?3)")?
            .execute(params![jobrun_id, seq, record.to_string()])?;
        Ok(())
    }

    pub fn add_jobfile(&self, jobrun_id: i64, name: &str) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO jobfile (jobrun_id, name) VALUES (?1, ?2)",
            params![jobrun_id, name],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Finalize an in-flight jobrun as succeeded. Returns false if it was
    /// already finalized.
    pub fn mark_jobrun_succeeded(&self, jobrun_id: i64) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE jobrun SET succeeded = 1, failed = 0 \
             WHERE id = ?1 AND failed IS NULL AND succeeded IS NULL",
            params![jobrun_id],
        )?;
        Ok(updated == 1)
    }

    /// Finalize an in-flight jobrun as failed. Returns false if it was
    /// already finalized.
    pub fn mark_jobrun_failed(&self, jobrun_id: i64) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE jobrun SET failed = 1, succeeded = 0 \
             WHERE id = ?1 AND failed IS NULL AND succeeded IS NULL",
            params![jobrun_id],
        )?;
        Ok(updated == 1)
    }

    pub fn get_jobrun(&self, jobrun_id: i64) -> Result<Option<Jobrun>> {
        let sql = format!("SELECT {} FROM jobrun WHERE id = ?1", JOBRUN_COLUMNS);
        self.connection()
            .query_row(&sql, params![jobrun_id], row_to_jobrun)
            .optional()
    }

    pub fn jobruns_for_fileset(&self, fileset_id: i64) -> Result<Vec<Jobrun>> {
        let sql = format!(
            "SELECT {} FROM jobrun WHERE fileset_id = ?1 ORDER BY id",
            JOBRUN_COLUMNS
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let rows = stmt.query_map(params![fileset_id], row_to_jobrun)?;
        rows.collect()
    }

    pub fn latest_jobrun(&self, fileset_id: i64, name: &str) -> Result<Option<Jobrun>> {
        let sql = format!(
            "SELECT {} FROM jobrun WHERE fileset_id = ?1 AND name = ?2 \
             ORDER BY id DESC LIMIT 1",
            JOBRUN_COLUMNS
        );
        self.connection()
            .query_row(&sql, params![fileset_id, name], row_to_jobrun)
            .optional()
    }

    /// Highest recorded version of each job that completed on a fileset.
    ///
    /// Versions are stored normalized, so string order is version order.
    pub fn latest_completed_versions(&self, fileset_id: i64) -> Result<HashMap<String, String>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT name, MAX(version) FROM jobrun \
             WHERE fileset_id = ?1 AND (succeeded = 1 OR failed = 1) \
             GROUP BY name",
        )?;
        let rows = stmt.query_map(params![fileset_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect()
    }

    /// Names of jobs whose latest jobrun on this fileset failed.
    pub fn failed_job_names(&self, fileset_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT j.name FROM jobrun j \
             WHERE j.fileset_id = ?1 AND j.failed = 1 AND j.id = \
               (SELECT MAX(id) FROM jobrun WHERE fileset_id = j.fileset_id AND name = j.name) \
             ORDER BY j.name",
        )?;
        let rows = stmt.query_map(params![fileset_id], |row| row.get(0))?;
        rows.collect()
    }

    pub fn job_results(&self, jobrun_id: i64) -> Result<Vec<serde_json::Value>, Error> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT record FROM job_result WHERE jobrun_id = ?1 ORDER BY seq, id",
        )?;
        let raw = stmt
            .query_map(params![jobrun_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>>>()?;
        raw.iter()
            .map(|r| serde_json::from_str(r).map_err(Error::from))
            .collect()
    }

    pub fn jobfiles(&self, jobrun_id: i64) -> Result<Vec<JobFile>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT id, jobrun_id, name FROM jobfile WHERE jobrun_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![jobrun_id], |row| {
            Ok(JobFile {
                id: row.get(0)?,
                jobrun_id: row.get(1)?,
                name: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn jobrun_ids(&self) -> Result<HashSet<i64>> {
        let mut stmt = self.connection().prepare("SELECT id FROM jobrun")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    /// Delete every jobrun that is not the latest for its (fileset, job).
    ///
    /// Results and jobfile rows go with them via cascade. Returns the ids of
    /// the deleted jobruns so callers can clean up their directories.
    pub fn purge_outdated_jobruns(&self) -> Result<Vec<(i64, String)>> {
        let tx = self.connection().unchecked_transaction()?;
        let outdated = {
            let mut stmt = tx.prepare(
                "SELECT id, name FROM jobrun WHERE id NOT IN \
                 (SELECT MAX(id) FROM jobrun GROUP BY fileset_id, name) ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<(i64, String)>>>()?
        };
        {
            let mut delete = tx.prepare("DELETE FROM jobrun WHERE id = ?1")?;
            for (id, _) in &outdated {
                delete.execute(params![id])?;
            }
        }
        tx.commit()?;
        debug!("Purged {} outdated jobruns", outdated.len());
        Ok(outdated)
    }
}
