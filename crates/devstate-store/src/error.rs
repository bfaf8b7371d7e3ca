//! Error types for namespaced storage.

use thiserror::Error;

/// Errors that can occur during status storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The namespace is not one of the fixed set.
    ///
    /// `help` lists every valid namespace with its description.
    #[error("invalid status storage namespace {namespace:?}; try one of these instead:\n{help}")]
    InvalidNamespace { namespace: String, help: String },

    /// The namespace has never been written.
    #[error("namespace not found: {namespace}")]
    NamespaceNotFound { namespace: String },

    /// The namespace exists but does not contain the key.
    #[error("key not found: {namespace}.{key}")]
    KeyNotFound { namespace: String, key: String },

    /// A root in the data file is not a key/value mapping.
    #[error("namespace {namespace} is not a key/value mapping")]
    MalformedNamespace { namespace: String },

    /// A value could not be converted to or from its stored form.
    #[error("value error: {0}")]
    Value(#[from] serde_json::Error),

    /// The configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// The underlying durable tree failed.
    #[error("storage error: {0}")]
    Tree(#[from] devstate_tree::TreeError),
}

impl StoreError {
    /// Whether this is a lookup failure (missing namespace or key).
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            StoreError::NamespaceNotFound { .. } | StoreError::KeyNotFound { .. }
        )
    }
}

/// Convenience type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
