//! SQLite Database
//!
//! Conversation memory backed by rusqlite with r2d2 connection pooling.
//! Implements the `ContextStore` boundary consumed by the pipeline.

use std::path::Path;

use chrono::{DateTime, Utc};
use grounded_chat_core::{ContextStore, CoreResult, TurnRecord, TurnRole};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::database_path;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Raw memory row, before timestamp and role parsing
type MemoryRow = (i64, String, String, String, bool);

const SELECT_COLUMNS: &str = "SELECT id, timestamp, role, content, pinned FROM memory";

/// Database service for the conversation memory
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a database from an existing connection pool.
    pub fn from_pool(pool: DbPool) -> AppResult<Self> {
        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    ///
    /// A single pooled connection keeps every caller on the same in-memory
    /// database.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;
        Self::from_pool(pool)
    }

    /// Open the default database (~/.grounded-chat/memory.db)
    pub fn new() -> AppResult<Self> {
        Self::open(&database_path()?)
    }

    /// Open (or create) the database at `db_path`
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        tracing::debug!(path = %db_path.display(), "opened memory database");
        Self::from_pool(pool)
    }

    fn conn(&self) -> AppResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    /// Initialize the database schema
    fn init_schema(&self) -> AppResult<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS memory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                pinned INTEGER DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memory_pinned ON memory(pinned, id)",
            [],
        )?;

        Ok(())
    }

    /// Append a record and return its id
    pub fn insert_turn(&self, record: &TurnRecord) -> AppResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO memory (timestamp, role, content, pinned) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.timestamp.to_rfc3339(),
                record.role.as_str(),
                record.content,
                record.pinned,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The `limit` most recent records, oldest first
    pub fn list_recent(&self, limit: usize) -> AppResult<Vec<TurnRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id DESC LIMIT ?1", SELECT_COLUMNS))?;
        let rows = stmt
            .query_map(params![limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut records = rows
            .into_iter()
            .map(into_record)
            .collect::<AppResult<Vec<_>>>()?;
        records.reverse();
        Ok(records)
    }

    /// Every pinned record, oldest first
    pub fn list_pinned(&self) -> AppResult<Vec<TurnRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE pinned = 1 ORDER BY id ASC", SELECT_COLUMNS))?;
        let rows = stmt
            .query_map([], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_record).collect()
    }

    /// Pin the most recent assistant reply. Returns its id, or `None` when
    /// there is nothing to pin.
    pub fn pin_latest(&self) -> AppResult<Option<i64>> {
        let conn = self.conn()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM memory WHERE role = ?1 ORDER BY id DESC LIMIT 1",
                params![TurnRole::Assistant.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = id {
            conn.execute("UPDATE memory SET pinned = 1 WHERE id = ?1", params![id])?;
            tracing::info!(id, "pinned latest reply");
        }
        Ok(id)
    }

    /// Pin a specific record
    pub fn set_pinned(&self, id: i64, pinned: bool) -> AppResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE memory SET pinned = ?1 WHERE id = ?2",
            params![pinned, id],
        )?;
        if changed == 0 {
            return Err(AppError::not_found(format!("memory record {}", id)));
        }
        Ok(())
    }

    pub fn count_turns(&self) -> AppResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM memory", [], |row| row.get(0))?)
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get::<_, Option<bool>>(4)?.unwrap_or(false),
    ))
}

fn into_record((id, timestamp, role, content, pinned): MemoryRow) -> AppResult<TurnRecord> {
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("Bad timestamp on memory record {}: {}", id, e)))?;
    let role: TurnRole = role.parse().map_err(AppError::database)?;
    Ok(TurnRecord {
        id: Some(id),
        timestamp,
        role,
        content,
        pinned,
    })
}

impl ContextStore for Database {
    fn append_turn(&self, record: TurnRecord) -> CoreResult<i64> {
        Ok(self.insert_turn(&record)?)
    }

    fn recent_turns(&self, limit: usize) -> CoreResult<Vec<TurnRecord>> {
        Ok(self.list_recent(limit)?)
    }

    fn pinned_insights(&self) -> CoreResult<Vec<TurnRecord>> {
        Ok(self.list_pinned()?)
    }
}
