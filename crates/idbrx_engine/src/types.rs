//! Shared engine vocabulary: directions, modes and schema parameters.

use crate::error::{EngineError, EngineResult};
use crate::key::KeyPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order in which a cursor visits records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending, visiting every record.
    #[default]
    Next,
    /// Ascending, visiting only the first record of each distinct key.
    NextUnique,
    /// Descending, visiting every record.
    Prev,
    /// Descending, visiting only one record per distinct key.
    PrevUnique,
}

impl Direction {
    /// Returns true for the ascending directions.
    #[must_use]
    pub const fn is_forward(self) -> bool {
        matches!(self, Self::Next | Self::NextUnique)
    }

    /// Returns true for the duplicate-skipping directions.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self, Self::NextUnique | Self::PrevUnique)
    }

    /// The IndexedDB name of the direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::NextUnique => "nextunique",
            Self::Prev => "prev",
            Self::PrevUnique => "prevunique",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "next" => Ok(Self::Next),
            "nextunique" => Ok(Self::NextUnique),
            "prev" => Ok(Self::Prev),
            "prevunique" => Ok(Self::PrevUnique),
            other => Err(EngineError::Type(format!("unknown cursor direction '{other}'"))),
        }
    }
}

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Reads only.
    ReadOnly,
    /// Reads and writes.
    ReadWrite,
    /// Schema changes; created by the engine during an upgrade only.
    VersionChange,
}

impl TransactionMode {
    /// The IndexedDB name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "readonly",
            Self::ReadWrite => "readwrite",
            Self::VersionChange => "versionchange",
        }
    }

    /// Returns true if the mode permits writes.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionMode {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "readonly" => Ok(Self::ReadOnly),
            "readwrite" => Ok(Self::ReadWrite),
            "versionchange" => Ok(Self::VersionChange),
            other => Err(EngineError::Type(format!("unknown transaction mode '{other}'"))),
        }
    }
}

/// Parameters for creating an object store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreParameters {
    /// Inline key path; `None` for out-of-line keys.
    pub key_path: Option<KeyPath>,
    /// Whether the store generates numeric keys.
    pub auto_increment: bool,
}

impl StoreParameters {
    /// Creates parameters for a store with out-of-line keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the inline key path.
    #[must_use]
    pub fn key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Sets whether keys are generated.
    #[must_use]
    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }
}

/// Parameters for creating an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParameters {
    /// Reject two records sharing an index key.
    pub unique: bool,
    /// Index each element of an array key separately.
    pub multi_entry: bool,
}

impl IndexParameters {
    /// Creates default parameters (non-unique, single entry).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unique flag.
    #[must_use]
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets the multi-entry flag.
    #[must_use]
    pub const fn multi_entry(mut self, value: bool) -> Self {
        self.multi_entry = value;
        self
    }
}

/// Versions involved in an upgrade or a blocked open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionChange {
    /// Version stored before the upgrade (0 for a new database).
    pub old_version: u32,
    /// Version being upgraded to.
    pub new_version: u32,
}

impl fmt::Display for VersionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{} -> v{}", self.old_version, self.new_version)
    }
}

/// Name and version of an existing database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Stored version.
    pub version: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_names_parse_back() {
        for direction in [
            Direction::Next,
            Direction::NextUnique,
            Direction::Prev,
            Direction::PrevUnique,
        ] {
            assert_eq!(direction.as_str().parse::<Direction>().unwrap(), direction);
        }
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::default(), Direction::Next);
    }

    #[test]
    fn direction_flags() {
        assert!(Direction::NextUnique.is_forward());
        assert!(Direction::NextUnique.is_unique());
        assert!(!Direction::Prev.is_forward());
        assert!(!Direction::Prev.is_unique());
    }

    #[test]
    fn mode_serde_names() {
        let json = serde_json::to_string(&TransactionMode::ReadWrite).unwrap();
        assert_eq!(json, "\"readwrite\"");
        assert_eq!("readonly".parse::<TransactionMode>().unwrap(), TransactionMode::ReadOnly);
        assert!(!TransactionMode::ReadOnly.is_writable());
    }

    #[test]
    fn store_parameters_builder() {
        let params = StoreParameters::new().key_path("id").auto_increment(true);
        assert_eq!(params.key_path, Some(KeyPath::from("id")));
        assert!(params.auto_increment);
    }

    #[test]
    fn key_path_serializes_untagged() {
        let single = serde_json::to_value(KeyPath::from("a.b")).unwrap();
        assert_eq!(single, serde_json::json!("a.b"));
        let multiple: KeyPath = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(multiple, KeyPath::from(vec!["a", "b"]));
    }
}
