//! Error types for kbforge.
//!
//! Library crates use [`KbForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kbforge operations.
#[derive(Debug, thiserror::Error)]
pub enum KbForgeError {
    /// Configuration loading, validation, or setup error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed task or collaborator input.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An entity with the same identity already exists.
    #[error("duplicate {kind}: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// A source or target could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A processing step failed on its input.
    #[error("step '{step}' failed: {message}")]
    Step { step: String, message: String },

    /// Scheduler lifecycle misuse (double start, missing executors, ...).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbForgeError>;

impl KbForgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for an entity kind and id.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a duplicate error for an entity kind and id.
    pub fn duplicate(kind: &'static str, id: impl Into<String>) -> Self {
        Self::Duplicate {
            kind,
            id: id.into(),
        }
    }

    /// Create a step error tagged with the step type.
    pub fn step(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable name of the error variant, recorded as `error_type` in results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "ConfigError",
            Self::Validation { .. } => "ValidationError",
            Self::NotFound { .. } => "NotFoundError",
            Self::Duplicate { .. } => "DuplicateError",
            Self::Connection(_) => "ConnectionError",
            Self::Storage(_) => "StorageError",
            Self::Step { .. } => "StepError",
            Self::Scheduler(_) => "SchedulerError",
            Self::Io { .. } => "IoError",
            Self::Serialization(_) => "SerializationError",
        }
    }
}
