//! SQLite persistence for the deploy queue.
//!
//! Rows hold JSON documents keyed by deploy ID; typing happens one layer up
//! in [`crate::queue`]. Uses WAL mode so a worker process can read while the
//! relay writes.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};

/// Database handle wrapping a SQLite connection.
pub struct Db {
    conn: Connection,
}

/// A row of the CDS notification log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub id: i64,
    pub deploy_id: String,
    pub published_at: i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Db {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let db = Self {
            conn: Connection::open(path)?,
        };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqlResult<()> {
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS deploy_requests (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                deploy_id   TEXT NOT NULL UNIQUE,
                payload     TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cds (
                deploy_id  TEXT PRIMARY KEY,
                payload    TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cds_events (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                deploy_id    TEXT NOT NULL,
                published_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS leads (
                deploy_id  TEXT PRIMARY KEY,
                payload    TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Store a deploy request. Fails if the deploy ID was already used.
    pub fn insert_request(&self, deploy_id: &str, payload: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO deploy_requests (deploy_id, payload, enqueued_at) VALUES (?1, ?2, ?3)",
            params![deploy_id, payload, now_ms()],
        )?;
        Ok(())
    }

    /// Queued deploy IDs, oldest first.
    pub fn request_ids(&self) -> SqlResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT deploy_id FROM deploy_requests ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    /// Remove and return the oldest queued request.
    pub fn take_oldest_request(&self) -> SqlResult<Option<(String, String)>> {
        let tx = self.conn.unchecked_transaction()?;
        let row: Option<(i64, String, String)> = tx
            .query_row(
                "SELECT seq, deploy_id, payload FROM deploy_requests ORDER BY seq ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((seq, deploy_id, payload)) = row else {
            return Ok(None);
        };
        tx.execute("DELETE FROM deploy_requests WHERE seq = ?1", params![seq])?;
        tx.commit()?;
        Ok(Some((deploy_id, payload)))
    }

    /// Write the CDS document and append to the notification log atomically.
    pub fn publish_cds(&self, deploy_id: &str, payload: &str) -> SqlResult<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let now = now_ms();
        tx.execute(
            "INSERT INTO cds (deploy_id, payload, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(deploy_id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            params![deploy_id, payload, now],
        )?;
        tx.execute(
            "INSERT INTO cds_events (deploy_id, published_at) VALUES (?1, ?2)",
            params![deploy_id, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Overwrite the CDS document without logging a notification.
    pub fn put_cds(&self, deploy_id: &str, payload: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO cds (deploy_id, payload, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(deploy_id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            params![deploy_id, payload, now_ms()],
        )?;
        Ok(())
    }

    pub fn get_cds(&self, deploy_id: &str) -> SqlResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT payload FROM cds WHERE deploy_id = ?1",
                params![deploy_id],
                |row| row.get(0),
            )
            .optional()
    }

    /// Notifications published after `after_id`, in publish order.
    pub fn events_since(&self, after_id: i64) -> SqlResult<Vec<EventRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, deploy_id, published_at FROM cds_events WHERE id > ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![after_id], |row| {
            Ok(EventRow {
                id: row.get(0)?,
                deploy_id: row.get(1)?,
                published_at: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    /// Delete the queued request and its CDS. Returns the number of rows removed.
    pub fn delete(&self, deploy_id: &str) -> SqlResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = tx.execute(
            "DELETE FROM deploy_requests WHERE deploy_id = ?1",
            params![deploy_id],
        )?;
        removed += tx.execute("DELETE FROM cds WHERE deploy_id = ?1", params![deploy_id])?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn put_lead(&self, deploy_id: &str, payload: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO leads (deploy_id, payload, created_at) VALUES (?1, ?2, ?3)",
            params![deploy_id, payload, now_ms()],
        )?;
        Ok(())
    }

    pub fn get_lead(&self, deploy_id: &str) -> SqlResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT payload FROM leads WHERE deploy_id = ?1",
                params![deploy_id],
                |row| row.get(0),
            )
            .optional()
    }
}
