#![forbid(unsafe_code)]

//! Staging bucket: the session's single source of field values.
//!
//! # Design
//!
//! The bucket keeps two layers of `field -> Vec<Value>` arrays:
//!
//! ```text
//!   set_data(diff)
//!        │ pre-update hooks (may rewrite the diff)
//!        ▼
//!   normalize against merged view ──► empty? ─► no update
//!        │
//!        ▼
//!   ┌───────────────┐  commit()   ┌───────────────┐
//!   │    staged     │ ──────────► │   committed   │
//!   └───────────────┘ ◄────────── └───────────────┘
//!                      revert()
//! ```
//!
//! Reads go through the merged view: a staged array shadows the committed
//! one for the same field. Every effective update bumps `version` and is
//! published to staging subscribers as a normalized [`BucketDiff`].
//!
//! # Invariants
//!
//! 1. A published diff only contains slots that change the merged view.
//! 2. A tombstone at position `i` leaves the field with exactly `i` values.
//! 3. `version` increments by exactly 1 per published update.
//!
//! # Failure Modes
//!
//! - **Malformed diff** (values after a tombstone, tombstones past the end):
//!   the extra slots are dropped during normalization and logged at debug.
//!   Nothing is ever rejected.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::diff::{BucketDiff, FieldDiff, Slot, Value};

/// Plain `field -> values` data as stored in one layer of the bucket.
pub type BucketData = BTreeMap<String, Vec<Value>>;

type PreUpdateHook = Box<dyn FnMut(&mut BucketDiff)>;
type StagingCallback = Rc<dyn Fn(&StagingUpdate)>;
type StagingCallbackWeak = Weak<dyn Fn(&StagingUpdate)>;

/// A normalized update that reached the staging layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingUpdate {
    /// Bucket version after this update.
    pub version: u64,
    /// Only the slots that changed the merged view.
    pub diff: BucketDiff,
}

/// Sparse, versioned store of field values with commit/revert.
#[derive(Default)]
pub struct Bucket {
    committed: BucketData,
    staged: BucketData,
    version: u64,
    hooks: Vec<PreUpdateHook>,
    subscribers: Vec<StagingCallbackWeak>,
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("committed_fields", &self.committed.len())
            .field("staged_fields", &self.staged.len())
            .field("version", &self.version)
            .field("hooks", &self.hooks.len())
            .field("subscriber_count", &self.subscribers.len())
            .finish()
    }
}

impl Bucket {
    /// Create an empty bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bucket whose committed view is `data`.
    #[must_use]
    pub fn from_committed(data: BucketData) -> Self {
        Self {
            committed: data,
            ..Self::default()
        }
    }

    /// Load a committed view from a JSON object of string arrays.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json).map(Self::from_committed)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current values of `field`; empty for unknown fields.
    #[must_use]
    pub fn data_by_name(&self, field: &str) -> &[Value] {
        self.staged
            .get(field)
            .or_else(|| self.committed.get(field))
            .map_or(&[], Vec::as_slice)
    }

    /// Committed values of `field`, ignoring anything staged.
    #[must_use]
    pub fn committed_by_name(&self, field: &str) -> &[Value] {
        self.committed.get(field).map_or(&[], Vec::as_slice)
    }

    /// Number of indexes `field` currently holds.
    #[must_use]
    pub fn len_of(&self, field: &str) -> usize {
        self.data_by_name(field).len()
    }

    /// Value at `field[index]`, if present.
    #[must_use]
    pub fn value(&self, field: &str, index: usize) -> Option<&Value> {
        self.data_by_name(field).get(index)
    }

    /// Borrow the merged view.
    #[must_use]
    pub fn view(&self) -> BucketView<'_> {
        BucketView { bucket: self }
    }

    /// Run `f` with scoped access to the merged view a commit would persist.
    pub fn visit_data<R>(&self, f: impl FnOnce(&BucketView<'_>) -> R) -> R {
        f(&self.view())
    }

    /// Monotonic update counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether anything is staged.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Names of staged fields, sorted.
    pub fn staged_fields(&self) -> impl Iterator<Item = &str> {
        self.staged.keys().map(String::as_str)
    }

    // ========================================================================
    // Hooks and subscriptions
    // ========================================================================

    /// Register a hook run synchronously on every incoming diff before merge.
    pub fn on_pre_data_update(&mut self, hook: impl FnMut(&mut BucketDiff) + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Subscribe to normalized staging updates.
    ///
    /// The callback stays registered for as long as the returned guard lives.
    pub fn subscribe(&mut self, callback: impl Fn(&StagingUpdate) + 'static) -> StagingSubscription {
        let strong: StagingCallback = Rc::new(callback);
        self.subscribers.push(Rc::downgrade(&strong));
        StagingSubscription { _guard: strong }
    }

    /// Registered subscribers, including dropped ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn publish(&mut self, diff: BucketDiff) -> StagingUpdate {
        self.version += 1;
        let update = StagingUpdate {
            version: self.version,
            diff,
        };

        self.subscribers.retain(|w| w.strong_count() > 0);
        let callbacks: Vec<StagingCallback> =
            self.subscribers.iter().filter_map(Weak::upgrade).collect();
        for cb in &callbacks {
            cb(&update);
        }

        tracing::trace!(
            target: "qform.bucket",
            version = update.version,
            fields = update.diff.len(),
            subscribers = callbacks.len(),
            "staging update"
        );
        update
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Merge a partial update into the staging layer.
    ///
    /// Returns the normalized update, or `None` when nothing changed.
    pub fn set_data(&mut self, mut diff: BucketDiff) -> Option<StagingUpdate> {
        for hook in &mut self.hooks {
            hook(&mut diff);
        }

        let mut normalized = BucketDiff::new();
        for (field, field_diff) in diff {
            let current = self.data_by_name(&field);
            let clean = normalize(&field, current, &field_diff);
            if clean.is_empty() {
                continue;
            }
            let mut values = current.to_vec();
            apply(&mut values, &clean);
            self.staged.insert(field.clone(), values);
            normalized.insert(field, clean);
        }

        if normalized.is_empty() {
            tracing::trace!(target: "qform.bucket", "set_data produced no change");
            return None;
        }
        Some(self.publish(normalized))
    }

    /// Fold the staging layer into the committed view.
    ///
    /// Returns the names of the committed fields.
    pub fn commit(&mut self) -> Vec<String> {
        let staged = std::mem::take(&mut self.staged);
        let mut names = Vec::with_capacity(staged.len());
        for (field, values) in staged {
            if values.is_empty() {
                self.committed.remove(&field);
            } else {
                self.committed.insert(field.clone(), values);
            }
            names.push(field);
        }
        tracing::debug!(target: "qform.bucket", fields = names.len(), "bucket committed");
        names
    }

    /// Discard the staging layer.
    ///
    /// Returns the diff that takes the merged view back to the committed one,
    /// which is also published to subscribers.
    pub fn revert(&mut self) -> Option<StagingUpdate> {
        let staged = std::mem::take(&mut self.staged);
        let mut restore = BucketDiff::new();
        for (field, values) in staged {
            let committed = self.committed_by_name(&field);
            let mut diff = FieldDiff::new();
            for (i, value) in committed.iter().enumerate() {
                if values.get(i) != Some(value) {
                    diff.set(i, value.clone());
                }
            }
            diff.remove_tail(committed.len(), values.len());
            if !diff.is_noop() {
                restore.insert(field, diff);
            }
        }

        tracing::debug!(target: "qform.bucket", fields = restore.len(), "bucket reverted");
        if restore.is_empty() {
            return None;
        }
        Some(self.publish(restore))
    }
}

/// Reduce `diff` to the slots that change `current`.
///
/// Tombstones after the first one are kept while they point at existing
/// indexes: they do not change what `apply` does, but they tell row
/// reconciliation which positions went away.
fn normalize(field: &str, current: &[Value], diff: &FieldDiff) -> FieldDiff {
    let mut out = Vec::with_capacity(diff.len());
    let mut truncated = false;
    let mut ignored = 0usize;
    for (i, slot) in diff.slots().iter().enumerate() {
        let clean = match slot {
            Slot::Removed if i < current.len() => {
                truncated = true;
                Slot::Removed
            }
            Slot::Removed => {
                truncated = true;
                Slot::Unchanged
            }
            Slot::Set(_) if truncated => {
                ignored += 1;
                Slot::Unchanged
            }
            Slot::Set(value) if current.get(i) == Some(value) => Slot::Unchanged,
            Slot::Set(value) => Slot::Set(value.clone()),
            Slot::Unchanged => Slot::Unchanged,
        };
        out.push(clean);
    }

    if ignored > 0 {
        tracing::debug!(
            target: "qform.bucket",
            field,
            ignored,
            "slots after tombstone ignored"
        );
    }

    let mut clean = FieldDiff::from_slots(out);
    clean.trim();
    clean
}

/// Apply a diff to a value array: writes pad with empty values, the first
/// tombstone truncates.
pub fn apply(values: &mut Vec<Value>, diff: &FieldDiff) {
    for (i, slot) in diff.slots().iter().enumerate() {
        match slot {
            Slot::Unchanged => {}
            Slot::Set(value) => {
                if values.len() <= i {
                    values.resize(i + 1, Value::new());
                }
                values[i] = value.clone();
            }
            Slot::Removed => {
                values.truncate(i);
                return;
            }
        }
    }
}

/// Scoped read access to the merged bucket view.
#[derive(Clone, Copy)]
pub struct BucketView<'a> {
    bucket: &'a Bucket,
}

impl<'a> BucketView<'a> {
    /// Values of `field`; empty for unknown fields.
    #[must_use]
    pub fn get(&self, field: &str) -> &'a [Value] {
        self.bucket.data_by_name(field)
    }

    /// Value at `field[index]`, if present.
    #[must_use]
    pub fn value(&self, field: &str, index: usize) -> Option<&'a Value> {
        self.bucket.value(field, index)
    }

    /// Every field name known to either layer, sorted.
    #[must_use]
    pub fn field_names(&self) -> Vec<&'a str> {
        let names: BTreeSet<&str> = self
            .bucket
            .committed
            .keys()
            .chain(self.bucket.staged.keys())
            .map(String::as_str)
            .collect();
        names.into_iter().collect()
    }

    /// Copy the merged view out.
    #[must_use]
    pub fn to_data(&self) -> BucketData {
        self.field_names()
            .into_iter()
            .map(|name| (name.to_owned(), self.get(name).to_vec()))
            .filter(|(_, values)| !values.is_empty())
            .collect()
    }
}

impl fmt::Debug for BucketView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.field_names().into_iter().map(|n| (n, self.get(n))))
            .finish()
    }
}

/// RAII guard for a staging subscriber.
///
/// Dropping it makes the callback unreachable; the dead entry is pruned on
/// the next published update.
pub struct StagingSubscription {
    _guard: StagingCallback,
}

impl fmt::Debug for StagingSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingSubscription").finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
