use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while building or loading ECG records.
///
/// Every failure is local and synchronous; nothing is retried internally.
#[derive(Debug, Error)]
pub enum EcgError {
    /// A referenced file (or a sibling it depends on) does not exist.
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    /// A basename resolved to more than one candidate record file.
    #[error("{count} candidate files start with {}", .base.display())]
    Ambiguous { base: PathBuf, count: usize },

    /// A value of the wrong kind was supplied where a typed one is required.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Dimensions of signals, names or time axes disagree.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("timestamps are not strictly increasing")]
    NonMonotonicTime,

    #[error("index {index} out of range for length {len}")]
    OutOfBounds { index: usize, len: usize },

    /// Invalid caller-supplied parameters (split ratios, output names).
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or unsupported on-disk content.
    #[error("{}: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, EcgError>;

impl EcgError {
    /// Wrap an I/O error, promoting "file not found" to [`EcgError::NotFound`].
    pub fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            EcgError::NotFound(path.to_path_buf())
        } else {
            EcgError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn format(path: &Path, reason: impl Into<String>) -> Self {
        EcgError::Format {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EcgError::NotFound(_))
    }
}
