//! Encrypted record model and record identity

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::crypto::envelope;

/// Stable identity of a record: `namespace/name`
///
/// Ordering is lexicographic by namespace, then by name. The scanner,
/// the resume cursor and the stores all rely on this single ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub namespace: String,
    pub name: String,
}

impl RecordId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for RecordId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(RecordId::new(namespace, name))
            }
            _ => Err(format!("Invalid record identity '{}': expected namespace/name", s)),
        }
    }
}

/// Which records a job targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    All,
    Namespace(String),
}

impl Scope {
    pub fn contains(&self, id: &RecordId) -> bool {
        match self {
            Scope::All => true,
            Scope::Namespace(ns) => &id.namespace == ns,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::Namespace(ns) => f.write_str(ns),
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("Scope cannot be empty".to_string()),
            "all" | "*" => Ok(Scope::All),
            ns if ns.contains('/') => Err(format!("Invalid namespace '{}'", ns)),
            ns => Ok(Scope::Namespace(ns.to_string())),
        }
    }
}

/// Equality-based label selector (`k=v,k2=v2`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.get(k).map_or(false, |actual| actual == v))
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for LabelSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut requirements = BTreeMap::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| format!("Invalid selector term '{}': expected key=value", part))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("Invalid selector term '{}': empty key", part));
            }
            requirements.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { requirements })
    }
}

/// A sealed secret record as held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    pub id: RecordId,
    /// Key generation label embedded in the ciphertext envelope; `None` for legacy records
    pub key_label: Option<String>,
    pub ciphertext: Vec<u8>,
    /// Optimistic concurrency token, changes on every successful write
    pub resource_version: String,
    pub labels: BTreeMap<String, String>,
}

impl EncryptedRecord {
    /// Build a record, reading the key label out of the ciphertext envelope
    pub fn new(id: RecordId, ciphertext: Vec<u8>, resource_version: impl Into<String>) -> Self {
        let key_label = envelope::peek_label(&ciphertext);
        Self {
            id,
            key_label,
            ciphertext,
            resource_version: resource_version.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn is_legacy(&self) -> bool {
        self.key_label.is_none()
    }
}
