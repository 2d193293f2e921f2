//! Storage layer
//!
//! One SQLite file holds both the mutable complaint table and the append-only
//! ledger. They share a connection pool but no foreign keys.

pub mod database;

use crate::complaints::ComplaintStore;
use crate::error::{CivicError, Result};
use crate::ledger::LedgerStore;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};

pub use database::{Database, DbPool, DbStats};

/// File name of the database inside the data directory
pub const DB_FILE_NAME: &str = "civic.sqlite";

/// Storage manager that wires both stores onto one database
pub struct StorageManager {
    pub database: Database,
    pub complaints: ComplaintStore,
    pub ledger: LedgerStore,
    base_path: PathBuf,
}

impl StorageManager {
    /// Create a new storage manager rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path).map_err(|e| CivicError::Io {
            source: e,
            context: format!("Failed to create data directory: {}", base_path.display()),
        })?;

        let database = Database::new(&base_path.join(DB_FILE_NAME))?;
        let complaints = ComplaintStore::new(database.pool());
        let ledger = LedgerStore::open(database.pool())?;

        Ok(Self {
            database,
            complaints,
            ledger,
            base_path,
        })
    }

    /// Path of the SQLite file
    pub fn db_path(&self) -> PathBuf {
        self.base_path.join(DB_FILE_NAME)
    }

    /// Get combined storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            db: self.database.stats()?,
            data_dir_size: Self::dir_size(&self.base_path)?,
        })
    }

    /// Calculate directory size recursively
    fn dir_size(path: &Path) -> Result<u64> {
        let mut size = 0u64;

        if path.is_dir() {
            for entry in std::fs::read_dir(path).map_err(|e| CivicError::Io {
                source: e,
                context: format!(
                    "Failed to read directory for size calculation: {}",
                    path.display()
                ),
            })? {
                let entry = entry.map_err(|e| CivicError::Io {
                    source: e,
                    context: "Failed to read directory entry for size calculation".to_string(),
                })?;
                let path = entry.path();

                if path.is_dir() {
                    size += Self::dir_size(&path)?;
                } else {
                    size += entry
                        .metadata()
                        .map_err(|e| CivicError::Io {
                            source: e,
                            context: format!("Failed to get file metadata: {}", path.display()),
                        })?
                        .len();
                }
            }
        }

        Ok(size)
    }
}

/// Combined storage statistics
#[derive(Debug)]
pub struct StorageStats {
    pub db: DbStats,
    pub data_dir_size: u64,
}

impl StorageStats {
    /// Format size as human-readable string
    pub fn format_size(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Canonical text form of a timestamp (RFC 3339, millisecond precision, `Z`)
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp; inside row mappers so errors stay rusqlite errors
pub(crate) fn parse_timestamp(
    column: usize,
    text: &str,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
