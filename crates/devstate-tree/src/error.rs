use std::io;
use std::path::PathBuf;

/// Errors produced by the durable tree.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// I/O error while loading or committing the data file.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The data file exists but its contents failed validation.
    #[error("corrupt data file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The data file was written by an incompatible format version.
    #[error("unsupported format version {found} in {path} (expected {expected})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    /// A mutation was attempted inside a read-only transaction.
    #[error("tree is read-only in this transaction")]
    ReadOnly,
}

/// Convenience alias used throughout the tree crate.
pub type Result<T> = std::result::Result<T, TreeError>;
