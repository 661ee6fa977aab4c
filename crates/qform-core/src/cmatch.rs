#![forbid(unsafe_code)]

//! Classification match matrix.
//!
//! The classifier reports, per class or field name, whether it matches
//! overall (`is`) and optionally per row index (`indexes`). An empty
//! `indexes` vector is a scalar match that applies to every row.
//!
//! The JSON shape accepted on input mirrors what classifiers emit:
//!
//! ```json
//! { "vehicles": { "is": false, "indexes": [false, true] },
//!   "has_sr22": { "is": true, "indexes": true } }
//! ```
//!
//! A scalar `indexes` value is read as "no per-index data".

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Deserializer, Serialize};

/// Match result for a single class or field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassMatch {
    /// Aggregate match.
    pub is: bool,
    /// Per-index matches; empty means broadcast `is` to every index.
    #[serde(default, deserialize_with = "scalar_or_vec")]
    pub indexes: Vec<bool>,
}

impl ClassMatch {
    /// Scalar match applying to every index.
    #[must_use]
    pub fn scalar(is: bool) -> Self {
        Self {
            is,
            indexes: Vec::new(),
        }
    }

    /// Per-index match. `is` is true when any index matches.
    #[must_use]
    pub fn per_index(indexes: Vec<bool>) -> Self {
        Self {
            is: indexes.iter().any(|&m| m),
            indexes,
        }
    }

    /// Per-index match with an explicit aggregate.
    #[must_use]
    pub fn new(is: bool, indexes: Vec<bool>) -> Self {
        Self { is, indexes }
    }

    /// Whether this entry carries no per-index data.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Match at `index`. Scalars broadcast; missing indexes do not match.
    #[must_use]
    pub fn at(&self, index: usize) -> bool {
        if self.is_scalar() {
            self.is
        } else {
            self.indexes.get(index).copied().unwrap_or(false)
        }
    }
}

fn scalar_or_vec<'de, D>(deserializer: D) -> Result<Vec<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Indexes {
        Scalar(#[allow(dead_code)] bool),
        List(Vec<bool>),
    }

    Ok(match Indexes::deserialize(deserializer)? {
        Indexes::Scalar(_) => Vec::new(),
        Indexes::List(list) => list,
    })
}

/// Classification output keyed by class or field name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchMatrix {
    entries: BTreeMap<String, ClassMatch>,
}

impl MatchMatrix {
    /// Create an empty matrix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a matrix from classifier JSON.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, entry: ClassMatch) -> Self {
        self.insert(name, entry);
        self
    }

    /// Insert or replace the entry for `name`.
    pub fn insert(&mut self, name: impl Into<String>, entry: ClassMatch) {
        self.entries.insert(name.into(), entry);
    }

    /// The entry for `name`, if classified.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ClassMatch> {
        self.entries.get(name)
    }

    /// Whether `name` matches at `index`; unknown names never match.
    #[must_use]
    pub fn matches_at(&self, name: &str, index: usize) -> bool {
        self.get(name).is_some_and(|entry| entry.at(index))
    }

    /// Iterate entries sorted by name.
    pub fn iter(&self) -> btree_map::Iter<'_, String, ClassMatch> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a MatchMatrix {
    type Item = (&'a String, &'a ClassMatch);
    type IntoIter = btree_map::Iter<'a, String, ClassMatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, ClassMatch)> for MatchMatrix {
    fn from_iter<I: IntoIterator<Item = (K, ClassMatch)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
