//! SQLite database management with migrations
//!
//! Provides durable storage for complaints and ledger blocks

use crate::error::{CivicError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CivicError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Per-connection settings; busy_timeout lets concurrent ledger
        // writers queue on the write lock instead of failing immediately.
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(16).build(manager)?;

        {
            let conn = pool.get()?;
            // WAL is persistent, so once is enough. Readers never block the
            // ledger writer and vice versa.
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        let db = Self { pool };

        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Clone of the underlying pool, for stores that share it
    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let complaint_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM complaints", [], |row| row.get(0))?;

        let located_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM complaints WHERE latitude IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        let block_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;

        Ok(DbStats {
            complaint_count: complaint_count as usize,
            located_count: located_count as usize,
            block_count: block_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub complaint_count: usize,
    pub located_count: usize,
    pub block_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Complaints table (mutable)
    CREATE TABLE complaints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        type TEXT NOT NULL,
        description TEXT NOT NULL,
        latitude REAL,
        longitude REAL,
        assigned_dept TEXT,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'in_progress', 'reviewed', 'rejected', 'completed')),
        priority TEXT CHECK (priority IN ('High', 'Medium', 'Low')),
        tags TEXT,
        ai_tags TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK ((latitude IS NULL) = (longitude IS NULL))
    );

    CREATE INDEX idx_complaints_created_at ON complaints(created_at);
    CREATE INDEX idx_complaints_assigned_dept ON complaints(assigned_dept);

    -- Ledger blocks (append-only, no foreign key to complaints)
    CREATE TABLE blocks (
        block_index INTEGER PRIMARY KEY,
        timestamp TEXT NOT NULL,
        data TEXT NOT NULL,
        hash TEXT NOT NULL,
        previous_hash TEXT NOT NULL,
        department TEXT NOT NULL DEFAULT 'General'
    );

    CREATE INDEX idx_blocks_department ON blocks(department);

    CREATE TRIGGER blocks_no_update BEFORE UPDATE ON blocks
    BEGIN
        SELECT RAISE(ABORT, 'ledger is append-only');
    END;

    CREATE TRIGGER blocks_no_delete BEFORE DELETE ON blocks
    BEGIN
        SELECT RAISE(ABORT, 'ledger is append-only');
    END;
    "#,
];
