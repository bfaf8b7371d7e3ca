//! The fixed set of storage namespaces.
//!
//! Namespaces are not arbitrary strings. Callers name them with strings
//! (or with [`Namespace`] directly), and anything outside this set is
//! rejected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A status storage namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Arduino-side settings.
    Bot,
    /// Raspberry Pi-side settings.
    Pi,
    /// The namespace in which all others reside.
    Root,
}

impl Namespace {
    /// Every valid namespace, in declaration order.
    pub const ALL: [Namespace; 3] = [Namespace::Bot, Namespace::Pi, Namespace::Root];

    /// The name used as the root key on disk.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Pi => "pi",
            Self::Root => "root",
        }
    }

    /// What the namespace is for, shown to callers who pick a wrong one.
    pub fn description(self) -> &'static str {
        match self {
            Self::Bot => {
                "Used for storage of Arduino specific settings, like the status \
                 register object inside the Arduino."
            }
            Self::Pi => {
                "Used for storage of Raspberry-Pi specific settings, such as the \
                 time of last_sync."
            }
            Self::Root => "The root namespace in which all other namespaces reside.",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Error returned when a string names no namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownNamespace(pub String);

impl fmt::Display for UnknownNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown namespace: {}", self.0)
    }
}

impl std::error::Error for UnknownNamespace {}

impl FromStr for Namespace {
    type Err = UnknownNamespace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| UnknownNamespace(s.to_string()))
    }
}

/// Human-readable list of every namespace and its purpose.
pub fn namespace_explanations() -> String {
    let width = Namespace::ALL
        .iter()
        .map(|ns| ns.as_str().len())
        .max()
        .unwrap_or(0);
    Namespace::ALL
        .iter()
        .map(|ns| format!("  {:<width$} => {}\n", ns.as_str(), ns.description()))
        .collect()
}
