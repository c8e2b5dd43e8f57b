use rusqlite::{Connection, Result};
use std::path::Path;
use tracing::debug;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -16000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, foreign keys on)");
        Ok(())
    }

    /// Apply the schema if the catalog is older than the current version.
    ///
    /// Unlike a derived cache the catalog is never dropped: every statement in
    /// the schema is idempotent.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(include_str!("schema.sql"))?;
            debug!("SQLite schema initialized (version 1)");
        }
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
