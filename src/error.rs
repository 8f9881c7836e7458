//! Error types for fsaudit
//!
//! Errors fall into two groups. Startup and store errors are fatal: they
//! propagate to the process boundary and no partial audit is reported.
//! Per-entry filesystem errors (an unreadable file, directory or link) are
//! contained by the scanner, logged, counted, and never abort a scan; they
//! only travel through this type as far as the scanner's entry loop.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the fsaudit library
pub type Result<T> = std::result::Result<T, AuditError>;

/// Main error type for all audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors raised by the SQLite baseline store
    #[error("Baseline store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Errors during JSON serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// Attribute flag name that is not in the attribute table
    #[error("Unknown attribute flag: {0}")]
    UnknownFlag(String),

    /// Baseline file could not be opened
    #[error("Cannot open baseline {path:?}: {reason}")]
    BaselineOpen {
        /// Baseline location
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Baseline exists but its schema is missing or from another version
    #[error("Baseline schema error: {0}")]
    Schema(String),

    /// Scan root is missing or not a readable directory
    #[error("Cannot scan {path:?}: {reason}")]
    InvalidRoot {
        /// Requested scan root
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Entry was replaced between `lstat` and open
    #[error("{path:?} was replaced while being read")]
    EntryChanged {
        /// Entry location
        path: PathBuf,
    },

    /// Store operation called out of its lifecycle order
    #[error("Baseline store misuse: {0}")]
    StoreState(String),

    /// Scan was cancelled between entries
    #[error("Scan cancelled")]
    Cancelled,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuditError {
    /// Create a schema error with a custom message
    pub fn schema(msg: impl Into<String>) -> Self {
        AuditError::Schema(msg.into())
    }

    /// Create a store-lifecycle error with a custom message
    pub fn store_state(msg: impl Into<String>) -> Self {
        AuditError::StoreState(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        AuditError::Internal(msg.into())
    }

    /// Check if this error belongs to the startup/fatal class
    ///
    /// Everything except plain I/O errors and replaced entries is fatal. I/O
    /// errors are fatal only when they escape the scanner, which contains the
    /// per-entry ones.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AuditError::Io(_) | AuditError::EntryChanged { .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            AuditError::UnknownFlag(flag) => {
                format!(
                    "Unknown attribute flag '{}'. Valid flags: {} (prefix with 'no' to disable).",
                    flag,
                    crate::attributes::Attribute::ALL
                        .iter()
                        .map(|a| a.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
            AuditError::Schema(msg) => {
                format!("{}. Run without --compare to generate a new baseline.", msg)
            }
            AuditError::BaselineOpen { path, reason } => {
                format!(
                    "Cannot open baseline {:?}: {}. Check the path and its permissions.",
                    path, reason
                )
            }
            _ => self.to_string(),
        }
    }
}
