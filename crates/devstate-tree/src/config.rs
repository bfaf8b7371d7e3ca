use serde::{Deserialize, Serialize};

/// Flush/sync strategy applied on commit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` the new image and its directory on every commit.
    #[default]
    EveryCommit,
    /// Rely on OS page-cache buffering. The rename is still atomic, but a
    /// power loss may roll back to an older image.
    OsDefault,
}

/// Configuration for a [`DurableTree`](crate::DurableTree).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Sync strategy used when committing.
    pub sync_mode: SyncMode,
    /// Create missing parent directories on the first commit.
    pub create_dirs: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            create_dirs: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = TreeConfig::default();
        assert_eq!(c.sync_mode, SyncMode::EveryCommit);
        assert!(c.create_dirs);
    }

    #[test]
    fn sync_mode_uses_snake_case() {
        let json = serde_json::to_string(&SyncMode::OsDefault).unwrap();
        assert_eq!(json, "\"os_default\"");
        let back: SyncMode = serde_json::from_str("\"every_commit\"").unwrap();
        assert_eq!(back, SyncMode::EveryCommit);
    }
}
