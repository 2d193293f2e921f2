use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the civic ledger
#[derive(Error, Debug)]
pub enum CivicError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Complaint lookup missed
    #[error("Complaint not found: {id}")]
    ComplaintNotFound { id: i64 },

    /// Caller supplied data the store cannot accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Classification collaborator failed or returned garbage
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Classification collaborator did not answer in time
    #[error("Classifier timed out after {secs}s")]
    ClassifierTimeout { secs: u64 },

    /// Stored chain does not recompute. Signals tampering or a lost block,
    /// never transient unavailability.
    #[error("Hash chain broken at block {index}: {details}")]
    HashChainBroken { index: i64, details: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Daemon errors
    #[error("Daemon error: {0}")]
    Daemon(String),

    /// Daemon not running
    #[error("Daemon is not running")]
    DaemonNotRunning,

    /// Daemon already running
    #[error("Daemon is already running (PID: {pid})")]
    DaemonAlreadyRunning { pid: i32 },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CivicError {
    /// True for failures that mean the ledger can no longer be trusted,
    /// as opposed to storage being temporarily unreachable.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, CivicError::HashChainBroken { .. })
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for civic ledger operations
pub type Result<T> = std::result::Result<T, CivicError>;
