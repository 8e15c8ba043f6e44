mod schema;

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use thiserror::Error;
use tracing::debug;

use schema::{DEDUPLICATE_ASSOCIATIONS, INDEXES, INITIAL_SCHEMA, MIGRATIONS};

/// Errors raised by the local SQLite store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite failures: I/O inside the engine, constraint violations, bad SQL.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failures around the store file itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has no backing file (in-memory database).
    #[error("store is not backed by a file")]
    NotFileBacked,

    /// The store file could not be reopened after it was replaced.
    #[error("store is closed")]
    Closed,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Database wrapper providing connection management and schema initialization.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens an in-memory SQLite database.
    ///
    /// Automatically initializes the schema on connection open.
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn, path: None };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Opens a file-based SQLite database at the given path.
    ///
    /// Creates the database file if it does not exist, and upgrades files
    /// written by older versions.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let db = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Opens an existing database file without write access.
    ///
    /// No schema work is done; the file must already carry the current
    /// schema (open it once with [`Database::open`] to upgrade it).
    pub fn open_read_only(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Initializes the database schema.
    ///
    /// Uses IF NOT EXISTS for idempotent execution.
    /// Runs migrations for column additions, ignoring "duplicate column" errors.
    /// Nothing is written when the file is already current, so reopening a
    /// store leaves its bytes unchanged.
    fn initialize_schema(&self) -> StorageResult<()> {
        self.conn.execute("PRAGMA foreign_keys = ON", [])?;
        self.conn.execute_batch(INITIAL_SCHEMA)?;

        // Execute migrations line by line, ignoring "duplicate column" errors
        for statement in MIGRATIONS.lines() {
            let trimmed = statement.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }

            match self.conn.execute(trimmed, []) {
                Ok(_) => debug!(statement = trimmed, "applied schema migration"),
                Err(rusqlite::Error::SqliteFailure(err, msg)) => {
                    let is_duplicate_column = msg
                        .as_ref()
                        .map(|s| s.contains("duplicate column"))
                        .unwrap_or(false);

                    if !is_duplicate_column {
                        return Err(rusqlite::Error::SqliteFailure(err, msg).into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let has_pair_index: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='index' AND name='idx_note_keyword_pair')",
            [],
            |row| row.get(0),
        )?;
        if !has_pair_index {
            let removed = self.conn.execute(DEDUPLICATE_ASSOCIATIONS, [])?;
            if removed > 0 {
                debug!(removed, "removed duplicate note_keyword rows");
            }
        }
        self.conn.execute_batch(INDEXES)?;

        Ok(())
    }

    /// Returns a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns the backing file path, or `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the connection, reporting any error SQLite raises on close.
    pub fn close(self) -> StorageResult<()> {
        self.conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
    }
}
