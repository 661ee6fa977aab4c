#![forbid(unsafe_code)]

//! Explicit per-index diffs for bucket updates.
//!
//! A [`FieldDiff`] is an ordered run of [`Slot`]s, one per row index. Each
//! slot says whether that index is left alone, overwritten, or removed:
//!
//! ```text
//! index:   0          1          2          3
//! slots:   Set("a")   Unchanged  Removed    Set("d")
//!                                ^
//!                                effective_len == 2
//! ```
//!
//! # Invariants
//!
//! 1. The first `Removed` slot terminates the field: `effective_len` is its
//!    position, and any slot after it has no effect when applied.
//! 2. `Unchanged` never overrides anything, neither on apply nor on
//!    [`BucketDiff::merge`].
//! 3. A `BucketDiff` never iterates fields in an unspecified order
//!    (`BTreeMap`), so downstream event order is deterministic.

use std::collections::BTreeMap;
use std::collections::btree_map;

/// Scalar value held at a single row index.
pub type Value = String;

/// The change to apply at one row index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Slot<T> {
    /// Leave the current value (or absence) alone.
    #[default]
    Unchanged,
    /// Overwrite the index with a value, creating it if absent.
    Set(T),
    /// Delete this index and everything after it.
    Removed,
}

impl<T> Slot<T> {
    /// Whether this slot is a tombstone.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        matches!(self, Slot::Removed)
    }

    /// Whether this slot has no effect.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Slot::Unchanged)
    }

    /// The value written by this slot, if any.
    #[must_use]
    pub fn as_set(&self) -> Option<&T> {
        match self {
            Slot::Set(value) => Some(value),
            _ => None,
        }
    }
}

/// Ordered per-index changes for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldDiff {
    slots: Vec<Slot<Value>>,
}

impl FieldDiff {
    /// Create an empty diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a diff from explicit slots.
    #[must_use]
    pub fn from_slots(slots: Vec<Slot<Value>>) -> Self {
        Self { slots }
    }

    /// A diff that overwrites indexes `0..values.len()` in order.
    pub fn set_all<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            slots: values.into_iter().map(|v| Slot::Set(v.into())).collect(),
        }
    }

    /// A diff that only writes `value` at `index`.
    #[must_use]
    pub fn set_at(index: usize, value: impl Into<Value>) -> Self {
        let mut diff = Self::new();
        diff.set(index, value);
        diff
    }

    /// A diff that removes `index` and everything after it.
    #[must_use]
    pub fn truncate_at(index: usize) -> Self {
        let mut diff = Self::new();
        diff.remove(index);
        diff
    }

    /// Tombstone every index in `from..len`.
    pub fn remove_tail(&mut self, from: usize, len: usize) {
        for index in from..len {
            self.remove(index);
        }
    }

    /// Write `value` at `index`, padding with `Unchanged`.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) {
        self.put(index, Slot::Set(value.into()));
    }

    /// Tombstone `index`.
    pub fn remove(&mut self, index: usize) {
        self.put(index, Slot::Removed);
    }

    fn put(&mut self, index: usize, slot: Slot<Value>) {
        if self.slots.len() <= index {
            self.slots.resize(index + 1, Slot::Unchanged);
        }
        self.slots[index] = slot;
    }

    /// The slots of this diff.
    #[must_use]
    pub fn slots(&self) -> &[Slot<Value>] {
        &self.slots
    }

    /// The slot at `index`; past the end reads as `Unchanged`.
    #[must_use]
    pub fn slot(&self, index: usize) -> &Slot<Value> {
        self.slots.get(index).unwrap_or(&Slot::Unchanged)
    }

    /// Raw slot count, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether applying this diff can never change anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.slots.iter().all(Slot::is_unchanged)
    }

    /// Length implied by this diff: stops at the first tombstone.
    #[must_use]
    pub fn effective_len(&self) -> usize {
        self.first_removed().unwrap_or(self.slots.len())
    }

    /// Position of the first tombstone, if any.
    #[must_use]
    pub fn first_removed(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_removed)
    }

    /// Whether the diff shrinks the field.
    #[must_use]
    pub fn has_removals(&self) -> bool {
        self.first_removed().is_some()
    }

    /// Every tombstone position, ascending.
    #[must_use]
    pub fn removed_positions(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_removed().then_some(i))
            .collect()
    }

    /// Iterate `(index, value)` for every `Set` slot before the first tombstone.
    pub fn writes(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.slots[..self.effective_len()]
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_set().map(|v| (i, v)))
    }

    /// Overlay `other` on top of `self`. Later `Set`/`Removed` slots win.
    pub fn merge(&mut self, other: &FieldDiff) {
        for (i, slot) in other.slots.iter().enumerate() {
            if !slot.is_unchanged() {
                self.put(i, slot.clone());
            }
        }
    }

    /// Drop trailing `Unchanged` slots.
    pub fn trim(&mut self) {
        while self.slots.last().is_some_and(Slot::is_unchanged) {
            self.slots.pop();
        }
    }
}

impl<V: Into<Value>> FromIterator<Slot<V>> for FieldDiff {
    fn from_iter<I: IntoIterator<Item = Slot<V>>>(iter: I) -> Self {
        Self {
            slots: iter
                .into_iter()
                .map(|slot| match slot {
                    Slot::Unchanged => Slot::Unchanged,
                    Slot::Set(v) => Slot::Set(v.into()),
                    Slot::Removed => Slot::Removed,
                })
                .collect(),
        }
    }
}

/// A partial update across many fields.
///
/// Fields not mentioned are untouched; within a field, `Unchanged` slots
/// preserve their index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BucketDiff {
    fields: BTreeMap<String, FieldDiff>,
}

impl BucketDiff {
    /// Create an empty diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a whole field diff.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, diff: FieldDiff) -> Self {
        self.insert(field, diff);
        self
    }

    /// Replace the diff for `field`.
    pub fn insert(&mut self, field: impl Into<String>, diff: FieldDiff) {
        self.fields.insert(field.into(), diff);
    }

    /// Write a single value, merging with anything already staged for `field`.
    pub fn set(&mut self, field: &str, index: usize, value: impl Into<Value>) {
        self.entry(field).set(index, value);
    }

    /// Tombstone a single index, merging with anything already staged.
    pub fn remove(&mut self, field: &str, index: usize) {
        self.entry(field).remove(index);
    }

    fn entry(&mut self, field: &str) -> &mut FieldDiff {
        self.fields.entry(field.to_owned()).or_default()
    }

    /// The diff for `field`, if mentioned.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldDiff> {
        self.fields.get(field)
    }

    /// Whether `field` is mentioned.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Remove and return the diff for `field`.
    pub fn take(&mut self, field: &str) -> Option<FieldDiff> {
        self.fields.remove(field)
    }

    /// Mentioned field names, sorted.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Iterate `(field, diff)` pairs, sorted by field name.
    pub fn iter(&self) -> btree_map::Iter<'_, String, FieldDiff> {
        self.fields.iter()
    }

    /// Iterate mutable field diffs.
    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, String, FieldDiff> {
        self.fields.iter_mut()
    }

    /// Keep only the fields for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &mut FieldDiff) -> bool) {
        self.fields.retain(|name, diff| keep(name, diff));
    }

    /// Number of mentioned fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is mentioned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Overlay `other` on top of `self`, field by field.
    pub fn merge(&mut self, other: &BucketDiff) {
        for (name, diff) in &other.fields {
            self.entry(name).merge(diff);
        }
    }
}

impl IntoIterator for BucketDiff {
    type Item = (String, FieldDiff);
    type IntoIter = btree_map::IntoIter<String, FieldDiff>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a BucketDiff {
    type Item = (&'a String, &'a FieldDiff);
    type IntoIter = btree_map::Iter<'a, String, FieldDiff>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldDiff)> for BucketDiff {
    fn from_iter<I: IntoIterator<Item = (K, FieldDiff)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
