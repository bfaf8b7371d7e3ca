//! Durable tree storage for devstate.
//!
//! A [`DurableTree`] holds a single mapping of named roots to JSON values
//! and persists it as one file. Every access happens inside a scoped
//! transaction: the file is loaded into memory, the closure reads or mutates
//! the working copy, and on success the whole image is committed atomically
//! (temp file, `fsync`, rename). A crash leaves either the previous or the
//! new image on disk, never a mix.
//!
//! # Modules
//!
//! - [`error`] — Error types for tree operations
//! - [`config`] — [`TreeConfig`] and [`SyncMode`]
//! - [`format`] — On-disk framing (magic, version, length, CRC32)
//! - `lock` — exclusive `flock` on `<path>.lock` held for each transaction
//! - [`tree`] — [`DurableTree`] and [`Transaction`]

pub mod config;
pub mod error;
pub mod format;
mod lock;
pub mod tree;

pub use config::{SyncMode, TreeConfig};
pub use error::{Result, TreeError};
pub use tree::{DurableTree, Transaction, Tree};
