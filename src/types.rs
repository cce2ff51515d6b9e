//! Change records shared by the store, the emitter and the hijack layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription key that receives changes for every key.
pub const WILDCARD_KEY: &str = "*";

/// What happened to a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Write,
    Remove,
    Clear,
    /// Only produced by the hijack layer when read observation is enabled.
    Read,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Write => "write",
            ChangeType::Remove => "remove",
            ChangeType::Clear => "clear",
            ChangeType::Read => "read",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observed mutation (or read) of one storage key.
///
/// `value` is always the serialized form; it is `None` for removals and clears.
/// `source` names the adapter or hijacked object the change came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageChange {
    pub key: String,
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub kind: ChangeType,
    pub source: String,
}

impl StorageChange {
    pub fn new(key: impl Into<String>, value: Option<String>, kind: ChangeType, source: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value,
            kind,
            source: source.into(),
        }
    }

    pub fn write(key: impl Into<String>, value: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(key, Some(value.into()), ChangeType::Write, source)
    }

    pub fn remove(key: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(key, None, ChangeType::Remove, source)
    }

    pub fn clear(key: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(key, None, ChangeType::Clear, source)
    }

    pub fn read(key: impl Into<String>, value: Option<String>, source: impl Into<String>) -> Self {
        Self::new(key, value, ChangeType::Read, source)
    }

    /// True when the change is keyed by [`WILDCARD_KEY`] rather than a concrete key.
    pub fn is_wildcard(&self) -> bool {
        self.key == WILDCARD_KEY
    }
}
