use super::models::*;
use super::sqlite::Database;
use crate::error::Error;
use crate::format::FormatSummary;
use chrono::{DateTime, Utc};
use rusqlite::{params, Params, Result, Row};
use std::collections::BTreeSet;
use tracing::debug;

const FILESET_COLUMNS: &str = "id, storage_id, md5, name, dirpath, type, deleted, deleted_reason, \
     time_added, time_updated, time_read, read_succeeded, read_error, start_time, end_time";

const INTACT: &str =
    "NOT EXISTS (SELECT 1 FROM file WHERE file.fileset_id = fileset.id AND file.missing = 1)";

fn row_to_fileset(row: &Row<'_>) -> Result<Fileset> {
    Ok(Fileset {
        id: row.get(0)?,
        storage_id: row.get(1)?,
        md5: row.get(2)?,
        name: row.get(3)?,
        dirpath: row.get(4)?,
        fileset_type: row.get(5)?,
        files: Vec::new(),
        deleted: row.get(6)?,
        deleted_reason: row.get(7)?,
        time_added: row.get(8)?,
        time_updated: row.get(9)?,
        time_read: row.get(10)?,
        read_succeeded: row.get(11)?,
        read_error: row.get(12)?,
        start_time: row.get(13)?,
        end_time: row.get(14)?,
    })
}

impl Database {
    // ── Storage ──────────────────────────────────────────────────

    pub fn get_storage(&self) -> Result<Option<StorageInstance>, Error> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id, uuid FROM storage ORDER BY id")?;
        let storages = stmt
            .query_map([], |row| {
                Ok(StorageInstance {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        match storages.len() {
            0 => Ok(None),
            1 => Ok(storages.into_iter().next()),
            n => Err(Error::Storage(format!(
                "expected at most one storage, found {}",
                n
            ))),
        }
    }

    pub fn create_storage(&self) -> Result<StorageInstance, Error> {
        if self.get_storage()?.is_some() {
            return Err(Error::Storage("storage already initialized".to_string()));
        }
        let uuid = uuid::Uuid::new_v4().to_string();
        self.connection()
            .execute("INSERT INTO storage (uuid) VALUES (?1)", params![uuid])?;
        let id = self.connection().last_insert_rowid();
        debug!("Created storage {} ({})", id, uuid);
        Ok(StorageInstance { id, uuid })
    }

    pub fn ensure_storage(&self) -> Result<StorageInstance, Error> {
        match self.get_storage()? {
            Some(storage) => Ok(storage),
            None => self.create_storage(),
        }
    }

    // ── Filesets ─────────────────────────────────────────────────

    fn query_filesets<P: Params>(&self, where_sql: &str, params: P) -> Result<Vec<Fileset>> {
        let sql = format!(
            "SELECT {} FROM fileset WHERE {} ORDER BY id",
            FILESET_COLUMNS, where_sql
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let mut filesets = stmt
            .query_map(params, row_to_fileset)?
            .collect::<Result<Vec<_>>>()?;
        for fileset in filesets.iter_mut() {
            fileset.files = self.get_files(fileset.id)?;
        }
        Ok(filesets)
    }

    pub fn get_files(&self, fileset_id: i64) -> Result<Vec<File>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT id, fileset_id, idx, name, md5, size, missing \
             FROM file WHERE fileset_id = ?1 ORDER BY idx, id",
        )?;
        let files = stmt
            .query_map(params![fileset_id], |row| {
                Ok(File {
                    id: row.get(0)?,
                    fileset_id: row.get(1)?,
                    idx: row.get(2)?,
                    name: row.get(3)?,
                    md5: row.get(4)?,
                    size: row.get(5)?,
                    missing: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn all_filesets(&self, storage_id: i64) -> Result<Vec<Fileset>> {
        self.query_filesets("storage_id = ?1", params![storage_id])
    }

    pub fn active_filesets(&self, storage_id: i64) -> Result<Vec<Fileset>> {
        self.query_filesets("storage_id = ?1 AND deleted = 0", params![storage_id])
    }

    pub fn active_intact_filesets(&self, storage_id: i64) -> Result<Vec<Fileset>> {
        self.query_filesets(
            &format!("storage_id = ?1 AND deleted = 0 AND {}", INTACT),
            params![storage_id],
        )
    }

    pub fn broken_filesets(&self, storage_id: i64) -> Result<Vec<Fileset>> {
        self.query_filesets(
            &format!("storage_id = ?1 AND deleted = 0 AND NOT {}", INTACT),
            params![storage_id],
        )
    }

    pub fn pending_filesets(&self, storage_id: i64) -> Result<Vec<Fileset>> {
        self.query_filesets(
            "storage_id = ?1 AND deleted = 0 AND time_read IS NULL",
            params![storage_id],
        )
    }

    /// Active, intact filesets whose format reader succeeded: the job candidates.
    pub fn readable_filesets(&self, storage_id: i64) -> Result<Vec<Fileset>> {
        self.query_filesets(
            &format!(
                "storage_id = ?1 AND deleted = 0 AND read_succeeded = 1 AND {}",
                INTACT
            ),
            params![storage_id],
        )
    }

    pub fn get_fileset(&self, id: i64) -> Result<Option<Fileset>> {
        Ok(self.query_filesets("id = ?1", params![id])?.into_iter().next())
    }

    pub fn find_active_by_md5(&self, storage_id: i64, md5: &str) -> Result<Option<Fileset>> {
        Ok(self
            .query_filesets(
                "storage_id = ?1 AND deleted = 0 AND md5 = ?2",
                params![storage_id, md5],
            )?
            .into_iter()
            .next())
    }

    pub fn find_active_by_name_type(
        &self,
        storage_id: i64,
        name: &str,
        fileset_type: &str,
    ) -> Result<Option<Fileset>> {
        Ok(self
            .query_filesets(
                "storage_id = ?1 AND deleted = 0 AND name = ?2 AND type = ?3",
                params![storage_id, name, fileset_type],
            )?
            .into_iter()
            .next())
    }

    /// Insert a scanned fileset and its files, returning the stored row.
    pub fn insert_fileset(&self, storage_id: i64, fileset: &Fileset) -> Result<Fileset> {
        self.connection().execute(
            "INSERT INTO fileset (storage_id, md5, name, dirpath, type, deleted, \
             time_added, time_updated) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            params![
                storage_id,
                fileset.md5,
                fileset.name,
                fileset.dirpath,
                fileset.fileset_type,
                fileset.time_added,
                fileset.time_updated,
            ],
        )?;
        let id = self.connection().last_insert_rowid();
        self.insert_files(id, &fileset.files)?;

        let mut stored = fileset.clone();
        stored.id = id;
        stored.storage_id = storage_id;
        stored.files = self.get_files(id)?;
        Ok(stored)
    }

    fn insert_files(&self, fileset_id: i64, files: &[File]) -> Result<()> {
        let mut stmt = self.connection().prepare_cached(
            "INSERT INTO file (fileset_id, idx, name, md5, size, missing) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for file in files {
            stmt.execute(params![
                fileset_id,
                file.idx,
                file.name,
                file.md5,
                file.size,
                file.missing
            ])?;
        }
        Ok(())
    }

    /// Mark an active fileset as replaced by newer content. Deleted rows stay put.
    pub fn mark_superseded(&self, fileset_id: i64) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE fileset SET deleted = 1, deleted_reason = ?1 \
             WHERE id = ?2 AND deleted = 0",
            params![SUPERSEDED_REASON, fileset_id],
        )?;
        Ok(updated == 1)
    }

    /// Persist the result of `Fileset::update_from`: location attributes and
    /// a replaced file list.
    pub fn update_fileset_location(&self, fileset: &Fileset) -> Result<()> {
        self.connection().execute(
            "UPDATE fileset SET name = ?1, dirpath = ?2, type = ?3, time_updated = ?4 \
             WHERE id = ?5 AND deleted = 0",
            params![
                fileset.name,
                fileset.dirpath,
                fileset.fileset_type,
                fileset.time_updated,
                fileset.id
            ],
        )?;
        self.connection().execute(
            "DELETE FROM file WHERE fileset_id = ?1",
            params![fileset.id],
        )?;
        self.insert_files(fileset.id, &fileset.files)
    }

    pub fn set_file_missing(&self, file_id: i64, missing: bool) -> Result<()> {
        self.connection().execute(
            "UPDATE file SET missing = ?1 WHERE id = ?2",
            params![missing, file_id],
        )?;
        Ok(())
    }

    // ── Format reader results ────────────────────────────────────

    pub fn record_read_success(
        &self,
        fileset_id: i64,
        summary: &FormatSummary,
        time_read: DateTime<Utc>,
    ) -> Result<()> {
        self.connection().execute(
            "DELETE FROM fileset_topic WHERE fileset_id = ?1",
            params![fileset_id],
        )?;
        {
            let mut stmt = self.connection().prepare_cached(
                "INSERT INTO fileset_topic (fileset_id, topic, msg_type, msg_count) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (topic, info) in &summary.topics {
                stmt.execute(params![
                    fileset_id,
                    topic,
                    info.msg_type,
                    info.msg_count as i64
                ])?;
            }
        }
        self.connection().execute(
            "UPDATE fileset SET time_read = ?1, read_succeeded = 1, read_error = NULL, \
             start_time = ?2, end_time = ?3 WHERE id = ?4",
            params![
                time_read,
                summary.start_time,
                summary.end_time,
                fileset_id
            ],
        )?;
        Ok(())
    }

    pub fn record_read_failure(
        &self,
        fileset_id: i64,
        error: &str,
        time_read: DateTime<Utc>,
    ) -> Result<()> {
        self.connection().execute(
            "UPDATE fileset SET time_read = ?1, read_succeeded = 0, read_error = ?2 \
             WHERE id = ?3",
            params![time_read, error, fileset_id],
        )?;
        Ok(())
    }

    pub fn fileset_topics(&self, fileset_id: i64) -> Result<Vec<FilesetTopic>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT fileset_id, topic, msg_type, msg_count FROM fileset_topic \
             WHERE fileset_id = ?1 ORDER BY topic",
        )?;
        let topics = stmt
            .query_map(params![fileset_id], |row| {
                Ok(FilesetTopic {
                    fileset_id: row.get(0)?,
                    topic: row.get(1)?,
                    msg_type: row.get(2)?,
                    msg_count: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(topics)
    }

    pub fn fileset_topic_names(&self, fileset_id: i64) -> Result<BTreeSet<String>> {
        Ok(self
            .fileset_topics(fileset_id)?
            .into_iter()
            .map(|t| t.topic)
            .collect())
    }
}
