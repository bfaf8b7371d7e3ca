//! Namespaced status storage for device state.
//!
//! Some device state has to survive a reboot: the bot's current X, Y, Z
//! coordinates, the time of the last sync. A relational database is a lot of
//! machinery for a handful of key/value pairs, so this crate keeps them in a
//! single [`DurableTree`](devstate_tree::DurableTree) file, grouped under a
//! small, closed set of [`Namespace`]s.
//!
//! # Operations
//!
//! - [`NamespacedStore::update_attributes`] — merge key/value pairs into a
//!   namespace, creating it on first write
//! - [`NamespacedStore::fetch`] — read one key; fails if the namespace or
//!   key was never written
//! - [`NamespacedStore::to_h`] — snapshot of every namespace on disk
//!
//! Every operation validates its namespace first. Unknown namespaces fail
//! with [`StoreError::InvalidNamespace`], whose message lists the valid
//! namespaces and what each is for.
//!
//! # Modules
//!
//! - [`error`] — [`StoreError`] and the crate `Result` alias
//! - [`namespace`] — the fixed [`Namespace`] set
//! - [`config`] — [`StoreConfig`], loadable from TOML
//! - [`store`] — [`NamespacedStore`]

pub mod config;
pub mod error;
pub mod namespace;
pub mod store;

pub use config::StoreConfig;
pub use devstate_tree::SyncMode;
pub use error::{Result, StoreError};
pub use namespace::{namespace_explanations, Namespace};
pub use store::{Attributes, NamespacedStore, Snapshot};
