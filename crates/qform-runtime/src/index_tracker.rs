#![forbid(unsafe_code)]

//! Row-count reconciliation for multi-row field groups.
//!
//! An [`IndexTracker`] owns the number of rows the UI has materialized for
//! one group and keeps it in line with the bucket. Every diff touching the
//! group's length field is turned into a [`Reconcile`] target, clamped to the
//! group's `[min_rows, max_rows]` bounds, and realized as a sequence of
//! [`IndexOp`]s.
//!
//! ```text
//!   FieldDiff ──► Reconcile { desired_len, removed }
//!                      │ clamp(min_rows, max_rows)
//!                      ▼
//!        grow:   Add(count) .. Add(target - 1)
//!        shrink: Remove(removed.pop()) .. else Remove(count - 1)
//! ```
//!
//! While the group is inactive the target is stashed and realized on the
//! next activation. Several stashed targets coalesce: the latest length
//! wins and removal positions accumulate.
//!
//! # Invariants
//!
//! 1. `index_count()` only changes through emitted ops, one per op.
//! 2. After a reconciliation on an active group, `index_count()` equals the
//!    clamped target.
//! 3. `Remove` ops never name an index at or past the current count.

use tracing::debug;

use crate::sink::UiEvent;

/// A single materialization step for a group row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexOp {
    Add(usize),
    Remove(usize),
    Reset(usize),
}

impl IndexOp {
    /// The UI event announcing this op for `group`.
    #[must_use]
    pub fn to_event(self, group: &str) -> UiEvent {
        let group = group.to_owned();
        match self {
            Self::Add(index) => UiEvent::IndexAdd { group, index },
            Self::Remove(index) => UiEvent::IndexRemove { group, index },
            Self::Reset(index) => UiEvent::IndexReset { group, index },
        }
    }

    /// Whether the op changes which rows exist (as opposed to a reset).
    #[must_use]
    pub fn is_structural(self) -> bool {
        !matches!(self, Self::Reset(_))
    }
}

/// Row-count target derived from a length-field diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconcile {
    /// Unclamped number of rows wanted.
    pub desired_len: usize,
    /// Tombstoned positions, ascending; consumed from the back.
    pub removed: Vec<usize>,
    /// Tear down every row before rebuilding.
    pub reset: bool,
}

impl Reconcile {
    /// Plain length target.
    #[must_use]
    pub fn with_len(desired_len: usize) -> Self {
        Self {
            desired_len,
            ..Self::default()
        }
    }

    /// Target for a normalized diff of the length field, given the field's
    /// length once the diff is merged.
    ///
    /// A diff with tombstones shrinks the group to the first tombstone;
    /// anything else only grows or rewrites.
    #[must_use]
    pub fn from_diff(diff: &qform_core::FieldDiff, bucket_len: usize) -> Self {
        if diff.has_removals() {
            Self {
                desired_len: diff.effective_len(),
                removed: diff.removed_positions(),
                reset: false,
            }
        } else {
            Self::with_len(bucket_len.max(diff.len()))
        }
    }

    /// Fold a newer target into this one.
    fn absorb(&mut self, newer: Reconcile) {
        self.desired_len = newer.desired_len;
        self.reset |= newer.reset;
        for index in newer.removed {
            if let Err(at) = self.removed.binary_search(&index) {
                self.removed.insert(at, index);
            }
        }
    }
}

/// Tracks how many rows of one group are materialized.
#[derive(Debug, Clone)]
pub struct IndexTracker {
    group: String,
    length_field: String,
    min_rows: usize,
    max_rows: usize,
    index_count: usize,
    active: bool,
    pending: Option<Reconcile>,
}

impl IndexTracker {
    /// Create an inactive tracker with no rows. `max_rows == 0` is unbounded.
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        length_field: impl Into<String>,
        min_rows: usize,
        max_rows: usize,
    ) -> Self {
        Self {
            group: group.into(),
            length_field: length_field.into(),
            min_rows,
            max_rows,
            index_count: 0,
            active: false,
            pending: None,
        }
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Field whose diffs drive reconciliation.
    #[must_use]
    pub fn length_field(&self) -> &str {
        &self.length_field
    }

    /// Rows currently materialized.
    #[must_use]
    pub fn index_count(&self) -> usize {
        self.index_count
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a stashed target awaits activation.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn min_rows(&self) -> usize {
        self.min_rows
    }

    #[must_use]
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Clamp `len` into `[min_rows, max_rows]`.
    #[must_use]
    pub fn clamp(&self, len: usize) -> usize {
        let len = len.max(self.min_rows);
        if self.max_rows > 0 { len.min(self.max_rows) } else { len }
    }

    /// Whether one more row may be added on top of `len`.
    #[must_use]
    pub fn can_grow(&self, len: usize) -> bool {
        self.max_rows == 0 || len < self.max_rows
    }

    /// Whether one row may be removed from `len`.
    #[must_use]
    pub fn can_shrink(&self, len: usize) -> bool {
        len > self.min_rows
    }

    /// Reconcile after the length field changed.
    pub fn handle_index_change(&mut self, diff: &qform_core::FieldDiff, bucket_len: usize) -> Vec<IndexOp> {
        self.submit(Reconcile::from_diff(diff, bucket_len))
    }

    /// Materialize the initial rows for a bucket holding `bucket_len` rows.
    pub fn init(&mut self, bucket_len: usize) -> Vec<IndexOp> {
        self.submit(Reconcile::with_len(bucket_len))
    }

    /// Tear down every row, then materialize `bucket_len` rows again.
    pub fn reset(&mut self, bucket_len: usize) -> Vec<IndexOp> {
        self.submit(Reconcile {
            desired_len: bucket_len,
            removed: Vec::new(),
            reset: true,
        })
    }

    /// Mark the group shown or hidden. Activation realizes any stashed target.
    pub fn set_active(&mut self, active: bool) -> Vec<IndexOp> {
        self.active = active;
        if !active {
            return Vec::new();
        }
        match self.pending.take() {
            Some(pending) => {
                debug!(
                    target: "qform.index",
                    group = %self.group,
                    desired = pending.desired_len,
                    "applying stashed reconciliation"
                );
                self.realize(pending)
            }
            None => Vec::new(),
        }
    }

    fn submit(&mut self, target: Reconcile) -> Vec<IndexOp> {
        if self.active {
            return self.realize(target);
        }
        debug!(
            target: "qform.index",
            group = %self.group,
            desired = target.desired_len,
            "group inactive, reconciliation stashed"
        );
        match &mut self.pending {
            Some(pending) => pending.absorb(target),
            None => self.pending = Some(target),
        }
        Vec::new()
    }

    fn realize(&mut self, target: Reconcile) -> Vec<IndexOp> {
        let Reconcile {
            desired_len,
            mut removed,
            reset,
        } = target;
        let goal = self.clamp(desired_len);
        let mut ops = Vec::new();

        if reset {
            while self.index_count > 0 {
                self.index_count -= 1;
                ops.push(IndexOp::Reset(self.index_count));
            }
        }

        while self.index_count < goal {
            ops.push(IndexOp::Add(self.index_count));
            self.index_count += 1;
        }
        while self.index_count > goal {
            let index = loop {
                match removed.pop() {
                    Some(index) if index < self.index_count => break index,
                    Some(_) => continue,
                    None => break self.index_count - 1,
                }
            };
            ops.push(IndexOp::Remove(index));
            self.index_count -= 1;
        }

        if desired_len != goal {
            debug!(
                target: "qform.index",
                group = %self.group,
                desired = desired_len,
                clamped = goal,
                "row target clamped"
            );
        }
        debug!(
            target: "qform.index",
            group = %self.group,
            count = self.index_count,
            ops = ops.len(),
            "rows reconciled"
        );
        ops
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use qform_core::{FieldDiff, Slot};

    fn active(min: usize, max: usize) -> IndexTracker {
        let mut t = IndexTracker::new("vehicles", "vin", min, max);
        t.set_active(true);
        t
    }

    #[test]
    fn growth_adds_in_order() {
        let mut t = active(0, 0);
        let ops = t.handle_index_change(&FieldDiff::set_all(["a", "b"]), 2);
        assert_eq!(ops, vec![IndexOp::Add(0), IndexOp::Add(1)]);
        assert_eq!(t.index_count(), 2);
    }

    #[test]
    fn tombstone_truncates_desired_length() {
        let diff: FieldDiff = vec![
            Slot::Set("a"),
            Slot::Set("b"),
            Slot::Removed,
            Slot::Set("d"),
        ]
        .into_iter()
        .collect();
        assert_eq!(Reconcile::from_diff(&diff, 4).desired_len, 2);
    }

    #[test]
    fn write_only_diff_targets_longer_of_bucket_and_diff() {
        let diff = FieldDiff::set_at(4, "e");
        assert_eq!(Reconcile::from_diff(&diff, 2), Reconcile::with_len(5));
        assert_eq!(Reconcile::from_diff(&diff, 7), Reconcile::with_len(7));
    }

    #[test]
    fn clamp_respects_bounds() {
        let mut t = active(1, 3);
        let ops = t.init(5);
        assert_eq!(ops.len(), 3);
        assert_eq!(t.index_count(), 3);

        // Only position 0 was tombstoned; the second removal comes off the tail.
        let ops = t.handle_index_change(&FieldDiff::truncate_at(0), 0);
        assert_eq!(ops, vec![IndexOp::Remove(0), IndexOp::Remove(1)]);
        assert_eq!(t.index_count(), 1);
    }

    #[test]
    fn unbounded_max() {
        let t = IndexTracker::new("g", "f", 0, 0);
        assert_eq!(t.clamp(1000), 1000);
        assert!(t.can_grow(1000));
        assert!(!t.can_shrink(0));
    }

    #[test]
    fn removal_consumes_remove_set_lifo() {
        let mut t = active(0, 0);
        t.init(4);
        let mut diff = FieldDiff::new();
        diff.remove_tail(1, 4);
        let ops = t.handle_index_change(&diff, 1);
        assert_eq!(
            ops,
            vec![IndexOp::Remove(3), IndexOp::Remove(2), IndexOp::Remove(1)]
        );
    }

    #[test]
    fn removal_falls_back_to_tail() {
        let mut t = active(0, 0);
        t.init(3);
        let ops = t.submit(Reconcile::with_len(1));
        assert_eq!(ops, vec![IndexOp::Remove(2), IndexOp::Remove(1)]);
    }

    #[test]
    fn inactive_group_stashes_and_coalesces() {
        let mut t = IndexTracker::new("drivers", "name", 0, 0);
        assert!(t.init(2).is_empty());
        assert!(t.handle_index_change(&FieldDiff::set_at(2, "c"), 3).is_empty());
        assert!(t.has_pending());
        assert_eq!(t.index_count(), 0);

        let ops = t.set_active(true);
        assert_eq!(ops, vec![IndexOp::Add(0), IndexOp::Add(1), IndexOp::Add(2)]);
        assert!(!t.has_pending());
        assert!(t.set_active(true).is_empty(), "nothing left to apply");
    }

    #[test]
    fn activation_without_pending_is_quiet() {
        let mut t = IndexTracker::new("g", "f", 0, 0);
        assert!(t.set_active(true).is_empty());
    }

    #[test]
    fn reset_tears_down_then_rebuilds() {
        let mut t = active(1, 0);
        t.init(2);
        let ops = t.reset(0);
        assert_eq!(
            ops,
            vec![IndexOp::Reset(1), IndexOp::Reset(0), IndexOp::Add(0)]
        );
        assert_eq!(t.index_count(), 1);
    }

    #[test]
    fn op_events() {
        assert_eq!(
            IndexOp::Remove(4).to_event("g"),
            UiEvent::IndexRemove {
                group: "g".into(),
                index: 4
            }
        );
        assert!(!IndexOp::Reset(0).is_structural());
    }
}
