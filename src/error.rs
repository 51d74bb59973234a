//! Error types for sheetsync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Retryability flags for callers that want to re-run a sync
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers
//!
//! Timestamp canonicalization never produces an error; see [`crate::time`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sheetsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    DatabaseError,

    // Not Found (exit 3)
    FormNotFound,
    EntryNotFound,
    SnapshotNotFound,

    // Validation (exit 4)
    InvalidArgument,

    // Remote / sync (exit 6)
    RemoteError,
    InvalidSnapshot,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::DatabaseError => "DATABASE_ERROR",
            Self::FormNotFound => "FORM_NOT_FOUND",
            Self::EntryNotFound => "ENTRY_NOT_FOUND",
            Self::SnapshotNotFound => "SNAPSHOT_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::RemoteError => "REMOTE_ERROR",
            Self::InvalidSnapshot => "INVALID_SNAPSHOT",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::DatabaseError => 2,
            Self::FormNotFound | Self::EntryNotFound | Self::SnapshotNotFound => 3,
            Self::InvalidArgument => 4,
            Self::RemoteError | Self::InvalidSnapshot => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether re-running the same operation may succeed.
    ///
    /// Remote reads and a busy database are transient; a missing form or a
    /// malformed snapshot is not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteError | Self::DatabaseError)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in sheetsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Form not found: {form_id}")]
    FormNotFound { form_id: String },

    #[error("Entry not found: {entry_id} in form {form_id}")]
    EntryNotFound { form_id: String, entry_id: String },

    #[error("Snapshot not found: {}", path.display())]
    SnapshotNotFound { path: PathBuf },

    #[error("Invalid snapshot at line {line}: {message}")]
    InvalidSnapshot { line: usize, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Remote read failed: {0}")]
    Remote(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::FormNotFound { .. } => ErrorCode::FormNotFound,
            Self::EntryNotFound { .. } => ErrorCode::EntryNotFound,
            Self::SnapshotNotFound { .. } => ErrorCode::SnapshotNotFound,
            Self::InvalidSnapshot { .. } => ErrorCode::InvalidSnapshot,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Remote(_) => ErrorCode::RemoteError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::FormNotFound { form_id } => Some(format!(
                "Nothing cached for '{form_id}'. Run `sheetsync sync {form_id}` first."
            )),
            Self::EntryNotFound { form_id, entry_id } => Some(format!(
                "Entry '{entry_id}' is neither cached nor present remotely. \
                 Use `sheetsync list {form_id}` to see cached entries."
            )),
            Self::SnapshotNotFound { .. } => Some(
                "Point --source (or SHEETSYNC_SOURCE) at a directory holding <form_id>.jsonl files"
                    .to_string(),
            ),
            Self::Remote(_) => {
                Some("The cache is still usable offline; retry the sync later.".to_string())
            }
            Self::Config(_) => Some(
                "Check ~/.sheetsync/config.json and SHEETSYNC_* environment variables".to_string(),
            ),
            Self::InvalidSnapshot { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
