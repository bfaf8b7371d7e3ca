use std::fs;
use std::path::{Path, PathBuf};

use devstate_tree::{SyncMode, TreeConfig};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Default file name for the status storage image.
pub const DEFAULT_PATH: &str = "status_storage.devstate";

/// Configuration for a [`NamespacedStore`](crate::NamespacedStore).
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// path = "/var/lib/farm/status.devstate"
/// sync_mode = "os_default"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Location of the data file.
    pub path: PathBuf,
    /// Sync strategy used on commit.
    pub sync_mode: SyncMode,
    /// Record an empty entry under an invalid namespace before rejecting it.
    pub quarantine_invalid: bool,
    /// Create missing parent directories on first commit.
    pub create_dirs: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PATH),
            sync_mode: SyncMode::default(),
            quarantine_invalid: true,
            create_dirs: true,
        }
    }
}

impl StoreConfig {
    /// Default configuration with the data file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))
    }

    /// The tree settings derived from this configuration.
    pub fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            sync_mode: self.sync_mode,
            create_dirs: self.create_dirs,
        }
    }
}
