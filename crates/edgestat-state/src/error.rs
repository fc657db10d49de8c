//! Error types for the snapshot store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for snapshot store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read snapshot {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write snapshot {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(serde_json::Error),

    #[error("corrupt snapshot {}: {source}", .path.display())]
    Deserialize {
        path: PathBuf,
        source: serde_json::Error,
    },
}
