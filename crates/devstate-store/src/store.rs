//! The namespaced store over a durable tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use devstate_tree::{DurableTree, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::namespace::{namespace_explanations, Namespace};

/// Key/value pairs stored under one namespace.
pub type Attributes = BTreeMap<String, Value>;

/// Every namespace on disk mapped to its attributes.
pub type Snapshot = BTreeMap<String, Attributes>;

/// Durable key/value storage partitioned into a fixed set of namespaces.
///
/// Each root of the underlying tree is a namespace holding a JSON object.
/// All operations run in a transaction of their own, so every call sees a
/// consistent image and either commits completely or not at all.
#[derive(Debug)]
pub struct NamespacedStore {
    tree: DurableTree,
    quarantine_invalid: bool,
}

impl NamespacedStore {
    /// Open (or lazily create) the store described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let tree = DurableTree::open(&config.path, config.tree_config())?;
        Ok(Self {
            tree,
            quarantine_invalid: config.quarantine_invalid,
        })
    }

    /// Open the store at `path` with default settings.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(StoreConfig::at(path))
    }

    /// Merge `attributes` into `namespace`, creating the namespace on first
    /// write. The whole batch commits in one transaction.
    pub fn update_attributes<N, I, K, V>(&self, namespace: N, attributes: I) -> Result<()>
    where
        N: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let ns = self.validate(namespace.as_ref())?;
        let pairs = attributes
            .into_iter()
            .map(|(key, value)| -> Result<(String, Value)> {
                Ok((key.into(), serde_json::to_value(value)?))
            })
            .collect::<Result<Vec<_>>>()?;
        if pairs.is_empty() {
            return Ok(());
        }

        let count = pairs.len();
        self.tree.transaction(|txn| -> Result<()> {
            let root = txn.root_or_insert_with(ns.as_str(), || Value::Object(Map::new()))?;
            let map = root.as_object_mut().ok_or_else(|| malformed(ns))?;
            for (key, value) in pairs {
                map.insert(key, value);
            }
            Ok(())
        })?;

        debug!(namespace = %ns, keys = count, "attributes updated");
        Ok(())
    }

    /// Read `key` from `namespace`.
    ///
    /// A namespace that was never written is an error, not an empty map.
    pub fn fetch(&self, namespace: impl AsRef<str>, key: &str) -> Result<Value> {
        let ns = self.validate(namespace.as_ref())?;
        self.tree.transaction_read_only(|txn| -> Result<Value> {
            let attrs = attributes_of(txn, ns.as_str())?.ok_or_else(|| {
                StoreError::NamespaceNotFound {
                    namespace: ns.to_string(),
                }
            })?;
            attrs
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::KeyNotFound {
                    namespace: ns.to_string(),
                    key: key.to_string(),
                })
        })
    }

    /// [`fetch`](Self::fetch) and deserialize into `T`.
    pub fn fetch_as<T: DeserializeOwned>(&self, namespace: impl AsRef<str>, key: &str) -> Result<T> {
        let value = self.fetch(namespace, key)?;
        Ok(serde_json::from_value(value)?)
    }

    /// [`fetch`](Self::fetch), returning `default` if the namespace or key
    /// is missing. Other errors still propagate.
    pub fn fetch_or(&self, namespace: impl AsRef<str>, key: &str, default: Value) -> Result<Value> {
        match self.fetch(namespace, key) {
            Err(e) if e.is_lookup() => Ok(default),
            other => other,
        }
    }

    /// Snapshot of every namespace on disk.
    ///
    /// `namespace` is validated but does not filter the result; use
    /// [`namespace_snapshot`](Self::namespace_snapshot) for a single one.
    /// Roots that are not key/value mappings are left out.
    pub fn to_h(&self, namespace: impl AsRef<str>) -> Result<Snapshot> {
        self.validate(namespace.as_ref())?;
        self.tree.transaction_read_only(|txn| -> Result<Snapshot> {
            let mut snapshot = Snapshot::new();
            for (root, value) in txn.tree() {
                match value {
                    Value::Object(map) => {
                        snapshot.insert(root.clone(), to_attributes(map));
                    }
                    _ => warn!(root = %root, "skipping root that is not a key/value mapping"),
                }
            }
            Ok(snapshot)
        })
    }

    /// Copy of the attributes in one namespace; empty if never written.
    pub fn namespace_snapshot(&self, namespace: impl AsRef<str>) -> Result<Attributes> {
        let ns = self.validate(namespace.as_ref())?;
        self.tree.transaction_read_only(|txn| -> Result<Attributes> {
            Ok(attributes_of(txn, ns.as_str())?
                .map(to_attributes)
                .unwrap_or_default())
        })
    }

    /// Remove `key` from `namespace`, returning its value if it was present.
    pub fn delete_attribute(&self, namespace: impl AsRef<str>, key: &str) -> Result<Option<Value>> {
        let ns = self.validate(namespace.as_ref())?;
        let removed = self.tree.transaction(|txn| -> Result<Option<Value>> {
            match txn.get_mut(ns.as_str())? {
                None => Ok(None),
                Some(Value::Object(map)) => Ok(map.remove(key)),
                Some(_) => Err(malformed(ns)),
            }
        })?;
        if removed.is_some() {
            debug!(namespace = %ns, key, "attribute deleted");
        }
        Ok(removed)
    }

    /// Names of every root currently on disk, sorted.
    ///
    /// Includes quarantine entries left by invalid namespaces.
    pub fn roots(&self) -> Result<Vec<String>> {
        self.tree.transaction_read_only(|txn| -> Result<Vec<String>> {
            Ok(txn.roots().map(str::to_string).collect())
        })
    }

    /// Location of the data file.
    pub fn path(&self) -> &Path {
        self.tree.path()
    }

    fn validate(&self, namespace: &str) -> Result<Namespace> {
        if let Ok(ns) = namespace.parse::<Namespace>() {
            return Ok(ns);
        }

        if self.quarantine_invalid {
            // Overwrites any earlier quarantine entry for the same name.
            self.tree.transaction(|txn| -> Result<()> {
                txn.insert(namespace, Value::Object(Map::new()))?;
                Ok(())
            })?;
            warn!(namespace, "invalid namespace quarantined");
        } else {
            warn!(namespace, "invalid namespace rejected");
        }

        Err(StoreError::InvalidNamespace {
            namespace: namespace.to_string(),
            help: namespace_explanations(),
        })
    }
}

fn attributes_of<'t>(txn: &'t Transaction, name: &str) -> Result<Option<&'t Map<String, Value>>> {
    match txn.get(name) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(StoreError::MalformedNamespace {
            namespace: name.to_string(),
        }),
    }
}

fn to_attributes(map: &Map<String, Value>) -> Attributes {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn malformed(ns: Namespace) -> StoreError {
    StoreError::MalformedNamespace {
        namespace: ns.to_string(),
    }
}
