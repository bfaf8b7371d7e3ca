use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{SyncMode, TreeConfig};
use crate::error::{Result, TreeError};
use crate::format;
use crate::lock::FileLock;

/// The in-memory image of a durable tree: named roots mapped to values.
pub type Tree = BTreeMap<String, Value>;

/// Working copy of the tree handed to a transaction closure.
///
/// Mutations only reach disk if the closure returns `Ok` and the
/// transaction was neither aborted nor opened read-only.
#[derive(Debug)]
pub struct Transaction {
    tree: Tree,
    read_only: bool,
    aborted: bool,
}

impl Transaction {
    fn new(tree: Tree, read_only: bool) -> Self {
        Self {
            tree,
            read_only,
            aborted: false,
        }
    }

    /// Names of all roots currently in the tree, in sorted order.
    pub fn roots(&self) -> impl Iterator<Item = &str> + '_ {
        self.tree.keys().map(String::as_str)
    }

    pub fn contains_root(&self, name: &str) -> bool {
        self.tree.contains_key(name)
    }

    /// Read a root by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.tree.get(name)
    }

    /// Mutable access to a root by name.
    pub fn get_mut(&mut self, name: &str) -> Result<Option<&mut Value>> {
        self.ensure_writable()?;
        Ok(self.tree.get_mut(name))
    }

    /// Insert or replace a root, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Result<Option<Value>> {
        self.ensure_writable()?;
        Ok(self.tree.insert(name.into(), value))
    }

    /// Return the root named `name`, inserting `default()` first if absent.
    pub fn root_or_insert_with(
        &mut self,
        name: &str,
        default: impl FnOnce() -> Value,
    ) -> Result<&mut Value> {
        self.ensure_writable()?;
        Ok(self.tree.entry(name.to_string()).or_insert_with(default))
    }

    /// Remove a root, returning its value if it existed.
    pub fn remove(&mut self, name: &str) -> Result<Option<Value>> {
        self.ensure_writable()?;
        Ok(self.tree.remove(name))
    }

    /// The whole working copy.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Discard every change made so far; nothing will be committed.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(TreeError::ReadOnly);
        }
        Ok(())
    }
}

/// A tree of named roots persisted as a single file.
///
/// Each transaction reloads the file, so the view inside a transaction is
/// always the latest committed image. Transactions are serialized by an
/// internal mutex and by an exclusive lock on `<path>.lock`, so at most one
/// runs at a time per data file, across instances and processes.
#[derive(Debug)]
pub struct DurableTree {
    path: PathBuf,
    config: TreeConfig,
    lock: Mutex<()>,
}

impl DurableTree {
    /// Open the tree stored at `path`.
    ///
    /// A missing file is an empty tree; it is created by the first commit.
    /// An existing file is validated eagerly so corruption surfaces here
    /// rather than on first use.
    pub fn open(path: impl AsRef<Path>, config: TreeConfig) -> Result<Self> {
        let tree = Self {
            path: path.as_ref().to_path_buf(),
            config,
            lock: Mutex::new(()),
        };
        let image = tree.load()?;
        info!(path = %tree.path.display(), roots = image.len(), "durable tree opened");
        Ok(tree)
    }

    /// Run `f` inside a read-write transaction.
    ///
    /// On `Ok` the working copy is committed if it differs from the loaded
    /// image. On `Err` the working copy is discarded and the error returned
    /// unchanged.
    pub fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> std::result::Result<T, E>,
        E: From<TreeError>,
    {
        self.run(false, f)
    }

    /// Run `f` inside a transaction that never writes to disk.
    pub fn transaction_read_only<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> std::result::Result<T, E>,
        E: From<TreeError>,
    {
        self.run(true, f)
    }

    /// A deep copy of the current committed image.
    pub fn snapshot(&self) -> Result<Tree> {
        self.transaction_read_only(|txn| Ok(txn.tree().clone()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a committed image exists on disk.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn run<T, E, F>(&self, read_only: bool, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> std::result::Result<T, E>,
        E: From<TreeError>,
    {
        let _guard = self.acquire();
        let file_lock = FileLock::acquire(&self.path, self.config.create_dirs)?;
        let original = self.load()?;
        let mut txn = Transaction::new(original.clone(), read_only);
        debug!(
            path = %self.path.display(),
            lock = %file_lock.path().display(),
            read_only,
            "transaction begin"
        );

        let value = f(&mut txn)?;

        if txn.aborted {
            debug!(path = %self.path.display(), "transaction aborted");
        } else if read_only || txn.tree == original {
            debug!(path = %self.path.display(), "transaction unchanged; skipping commit");
        } else {
            self.commit(&txn.tree)?;
        }
        Ok(value)
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        // The guarded state lives on disk and is reloaded by every
        // transaction, so a panic in an earlier closure leaves nothing stale.
        self.lock.lock().unwrap_or_else(|poisoned| {
            warn!(path = %self.path.display(), "recovering poisoned tree lock");
            poisoned.into_inner()
        })
    }

    fn load(&self) -> Result<Tree> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Tree::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(Tree::new());
        }
        format::decode(&self.path, &bytes)
    }

    fn commit(&self, tree: &Tree) -> Result<()> {
        let bytes = format::encode(tree)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if self.config.create_dirs {
            fs::create_dir_all(&dir)?;
        }

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(&bytes)?;
        if self.config.sync_mode == SyncMode::EveryCommit {
            temp.as_file().sync_all()?;
        }
        temp.persist(&self.path).map_err(|e| TreeError::Io(e.error))?;

        if self.config.sync_mode == SyncMode::EveryCommit {
            // The new image is already visible; only its survival across a
            // power loss is in doubt.
            if let Err(e) = sync_dir(&dir) {
                warn!(dir = %dir.display(), error = %e, "directory fsync failed after commit");
            }
        }

        debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            roots = tree.len(),
            "transaction committed"
        );
        Ok(())
    }
}

/// Flush a directory entry so a completed rename survives power loss.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn open(dir: &tempfile::TempDir, name: &str) -> DurableTree {
        DurableTree::open(dir.path().join(name), TreeConfig::default()).unwrap()
    }

    #[test]
    fn missing_file_is_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open(&dir, "state.devstate");
        assert!(!tree.exists());
        assert!(tree.snapshot().unwrap().is_empty());
    }

    #[test]
    fn commit_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open(&dir, "state.devstate");
        tree.transaction(|txn| txn.insert("bot", json!({"x": 1})))
            .unwrap();
        assert!(tree.exists());
        drop(tree);

        let reopened = open(&dir, "state.devstate");
        let snap = reopened.snapshot().unwrap();
        assert_eq!(snap.get("bot"), Some(&json!({"x": 1})));
    }

    #[test]
    fn failed_transaction_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open(&dir, "state.devstate");
        tree.transaction(|txn| txn.insert("bot", json!({"x": 1})))
            .unwrap();

        let result: Result<()> = tree.transaction(|txn| {
            txn.insert("bot", json!({"x": 2}))?;
            txn.insert("pi", json!({}))?;
            Err(TreeError::Serialization("boom".into()))
        });
        assert!(result.is_err());

        let snap = tree.snapshot().unwrap();
        assert_eq!(snap.get("bot"), Some(&json!({"x": 1})));
        assert!(!snap.contains_key("pi"));
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open(&dir, "state.devstate");
        let err = tree
            .transaction_read_only(|txn| txn.insert("bot", json!({})))
            .unwrap_err();
        assert!(matches!(err, TreeError::ReadOnly));
        assert!(!tree.exists());
    }

    #[test]
    fn abort_discards_changes() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open(&dir, "state.devstate");
        tree.transaction(|txn| {
            txn.insert("bot", json!({"x": 1}))?;
            txn.abort();
            Ok::<_, TreeError>(())
        })
        .unwrap();
        assert!(!tree.exists());
    }

    #[test]
    fn unchanged_transaction_skips_commit() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open(&dir, "state.devstate");
        tree.transaction(|txn| {
            let _ = txn.contains_root("bot");
            Ok::<_, TreeError>(())
        })
        .unwrap();
        assert!(!tree.exists());
    }

    #[test]
    fn root_or_insert_with_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open(&dir, "state.devstate");
        tree.transaction(|txn| {
            txn.root_or_insert_with("bot", || json!({}))?;
            let root = txn.root_or_insert_with("bot", || json!({"unused": true}))?;
            assert_eq!(*root, json!({}));
            Ok::<_, TreeError>(())
        })
        .unwrap();
        assert_eq!(tree.snapshot().unwrap().get("bot"), Some(&json!({})));
    }

    #[test]
    fn stray_temp_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let tree = open(&dir, "state.devstate");
        tree.transaction(|txn| txn.insert("bot", json!({"x": 10})))
            .unwrap();

        // A commit interrupted before its rename leaves only a temp file.
        fs::write(dir.path().join(".tmpHALF"), b"DEVSTATE\x01\x00").unwrap();

        let reopened = open(&dir, "state.devstate");
        assert_eq!(
            reopened.snapshot().unwrap().get("bot"),
            Some(&json!({"x": 10}))
        );
    }

    #[test]
    fn corrupt_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.devstate");
        fs::write(&path, b"not a devstate image at all").unwrap();

        let err = DurableTree::open(&path, TreeConfig::default()).unwrap_err();
        assert!(matches!(err, TreeError::Corrupt { .. }), "got: {err}");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/state.devstate");
        let tree = DurableTree::open(&path, TreeConfig::default()).unwrap();
        tree.transaction(|txn| txn.insert("pi", json!({})))
            .unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn os_default_sync_mode_commits() {
        let dir = tempfile::tempdir().unwrap();
        let config = TreeConfig {
            sync_mode: SyncMode::OsDefault,
            ..TreeConfig::default()
        };
        let tree = DurableTree::open(dir.path().join("fast.devstate"), config).unwrap();
        tree.transaction(|txn| txn.insert("bot", json!(1))).unwrap();
        assert_eq!(tree.snapshot().unwrap().get("bot"), Some(&json!(1)));
    }

    #[test]
    fn panicking_transaction_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Arc::new(open(&dir, "state.devstate"));

        let t = Arc::clone(&tree);
        let joined = thread::spawn(move || {
            let _: Result<()> = t.transaction(|txn| {
                txn.insert("bot", json!({}))?;
                panic!("caller bug");
            });
        })
        .join();
        assert!(joined.is_err());

        tree.transaction(|txn| txn.insert("pi", json!({"ok": true})))
            .unwrap();
        let snap = tree.snapshot().unwrap();
        assert!(!snap.contains_key("bot"));
        assert!(snap.contains_key("pi"));
    }

    #[test]
    fn concurrent_transactions_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Arc::new(open(&dir, "counter.devstate"));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    for _ in 0..10 {
                        tree.transaction(|txn| {
                            let n = txn.get("count").and_then(Value::as_u64).unwrap_or(0);
                            txn.insert("count", json!(n + 1))
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tree.snapshot().unwrap().get("count"), Some(&json!(40)));
    }

    #[test]
    fn separate_instances_on_one_file_do_not_lose_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.devstate");

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let tree = DurableTree::open(&path, TreeConfig::default()).unwrap();
                thread::spawn(move || {
                    for _ in 0..25 {
                        tree.transaction(|txn| {
                            let n = txn.get("count").and_then(Value::as_u64).unwrap_or(0);
                            txn.insert("count", json!(n + 1))
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let reopened = DurableTree::open(&path, TreeConfig::default()).unwrap();
        assert_eq!(reopened.snapshot().unwrap().get("count"), Some(&json!(50)));
    }

    #[cfg(unix)]
    #[test]
    fn sync_dir_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sync_dir(dir.path()).is_ok());
        assert!(sync_dir(&dir.path().join("gone")).is_err());
    }
}
