#![forbid(unsafe_code)]

//! Classification-driven visibility.
//!
//! [`VisibilityResolver`] turns successive [`MatchMatrix`] results into
//! show/hide deltas per field and row index, remembers which indexes it has
//! hidden (the [`HiddenIndexLedger`]), and works out the bucket corrections
//! a visibility change implies.
//!
//! # Pass structure
//!
//! ```text
//!   matrix ──► for each active field
//!                 │ unchanged entry?  ─────────────► skip
//!                 ▼
//!              resolve per-index vector (broadcast scalars)
//!                 │ clamp to bucket length
//!                 ▼
//!              per index: same as last applied? ───► skip
//!                 │
//!                 ▼
//!              show / hide queue + ledger + corrections
//!          ──► cache := matrix
//! ```
//!
//! The cache is replaced before the caller dispatches anything, so event
//! handlers that inspect [`VisibilityResolver::cache`] always see the
//! matrix being applied.
//!
//! # Invariants
//!
//! 1. After [`handle_class_match`](VisibilityResolver::handle_class_match)
//!    returns, `cache()` equals the matrix that was passed in.
//! 2. An index is in the ledger only while it is hidden; showing it removes
//!    it.
//! 3. Hiding an index that was never tracked before may write the N/A
//!    sentinel; hiding a tracked index never touches its value.

use std::collections::{BTreeMap, BTreeSet};

use qform_core::{Bucket, BucketDiff, ClassMatch, FieldRegistry, MatchMatrix};
use tracing::{debug, info_span, trace};
use web_time::Instant;

use crate::resetter::ResetRequest;
use crate::sink::Visibility;

// ============================================================================
// HiddenIndexLedger
// ============================================================================

/// Indexes hidden since the last clear, with the order they were hidden in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiddenIndexLedger {
    fields: BTreeMap<String, BTreeMap<usize, u64>>,
    next_order: u64,
}

impl HiddenIndexLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `index` as hidden. An index already present keeps its order.
    pub fn hide(&mut self, field: &str, index: usize) {
        let entries = self.fields.entry(field.to_owned()).or_default();
        if !entries.contains_key(&index) {
            entries.insert(index, self.next_order);
            self.next_order += 1;
        }
    }

    /// Forget `index`; it is visible again.
    pub fn show(&mut self, field: &str, index: usize) {
        if let Some(entries) = self.fields.get_mut(field) {
            entries.remove(&index);
            if entries.is_empty() {
                self.fields.remove(field);
            }
        }
    }

    /// Drop `index` and shift later indexes of `field` down by one, as when
    /// the row at `index` went away.
    pub fn remove_index(&mut self, field: &str, index: usize) {
        let Some(entries) = self.fields.get_mut(field) else {
            return;
        };
        let shifted: BTreeMap<usize, u64> = std::mem::take(entries)
            .into_iter()
            .filter(|&(i, _)| i != index)
            .map(|(i, order)| if i > index { (i - 1, order) } else { (i, order) })
            .collect();
        if shifted.is_empty() {
            self.fields.remove(field);
        } else {
            *entries = shifted;
        }
    }

    /// Whether `field[index]` is recorded as hidden.
    #[must_use]
    pub fn contains(&self, field: &str, index: usize) -> bool {
        self.fields
            .get(field)
            .is_some_and(|entries| entries.contains_key(&index))
    }

    /// Hidden indexes of `field`, ascending.
    #[must_use]
    pub fn indexes(&self, field: &str) -> Vec<usize> {
        self.fields
            .get(field)
            .map(|entries| entries.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Order in which `field[index]` was hidden.
    #[must_use]
    pub fn order(&self, field: &str, index: usize) -> Option<u64> {
        self.fields.get(field)?.get(&index).copied()
    }

    /// Fields with at least one hidden index, sorted.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.fields.clear();
    }
}

// ============================================================================
// Pass input and output
// ============================================================================

/// Read-only state a visibility pass consults.
pub struct PassContext<'a> {
    /// Exclusive fields of the active step; everything else is skipped.
    pub active: &'a BTreeSet<String>,
    pub bucket: &'a Bucket,
    pub fields: &'a FieldRegistry,
    pub na_value: &'a str,
    /// Rows currently materialized for a field, when it belongs to a shown group.
    pub rendered: &'a dyn Fn(&str) -> Option<usize>,
}

/// Show/hide work queued for one field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldVisibility {
    pub field: String,
    pub show: Vec<usize>,
    pub hide: Vec<usize>,
}

impl FieldVisibility {
    /// Indexes queued for `action`.
    #[must_use]
    pub fn indexes(&self, action: Visibility) -> &[usize] {
        match action {
            Visibility::Show => &self.show,
            Visibility::Hide => &self.hide,
        }
    }

    fn queue(&mut self, action: Visibility, index: usize) {
        match action {
            Visibility::Show => self.show.push(index),
            Visibility::Hide => self.hide.push(index),
        }
    }

    fn is_empty(&self) -> bool {
        self.show.is_empty() && self.hide.is_empty()
    }
}

/// Result of one visibility pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityPass {
    /// Fields with work, in field-name order.
    pub queue: Vec<FieldVisibility>,
    /// Bucket writes to apply once every event of the pass is dispatched.
    pub corrections: BucketDiff,
}

impl VisibilityPass {
    /// Total indexes shown and hidden.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        self.queue.iter().fold((0, 0), |(s, h), fv| {
            (s + fv.show.len(), h + fv.hide.len())
        })
    }
}

// ============================================================================
// VisibilityResolver
// ============================================================================

/// Diffs classification results against what was last applied.
#[derive(Debug, Clone, Default)]
pub struct VisibilityResolver {
    /// Last matrix handed to `handle_class_match`.
    cache: MatchMatrix,
    /// Last per-index vector actually applied per field.
    applied: BTreeMap<String, Vec<bool>>,
    ledger: HiddenIndexLedger,
}

impl VisibilityResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The matrix most recently applied.
    #[must_use]
    pub fn cache(&self) -> &MatchMatrix {
        &self.cache
    }

    /// Indexes hidden since the last clear.
    #[must_use]
    pub fn ledger(&self) -> &HiddenIndexLedger {
        &self.ledger
    }

    /// Last per-index visibility applied to `field`.
    #[must_use]
    pub fn applied(&self, field: &str) -> Option<&[bool]> {
        self.applied.get(field).map(Vec::as_slice)
    }

    /// Compute the show/hide deltas and corrections for `cmatch`, then make
    /// it the cache.
    ///
    /// With `force`, cache equality is ignored and every resolved index is
    /// queued.
    pub fn handle_class_match(
        &mut self,
        cmatch: MatchMatrix,
        force: bool,
        cx: &PassContext<'_>,
    ) -> VisibilityPass {
        let start = Instant::now();
        let span = info_span!(
            "qform.cmatch",
            fields = cmatch.len(),
            force,
            shown = tracing::field::Empty,
            hidden = tracing::field::Empty,
            duration_us = tracing::field::Empty
        )
        .entered();

        let mut pass = VisibilityPass::default();
        for (field, entry) in &cmatch {
            if !cx.active.contains(field) {
                trace!(target: "qform.cmatch", field = %field, "not on active step");
                continue;
            }
            if !force && self.cache.get(field) == Some(entry) {
                continue;
            }
            let fv = self.resolve_field(field, entry, force, cx, &mut pass.corrections);
            if !fv.is_empty() {
                pass.queue.push(fv);
            }
        }

        // Must be in place before anything is dispatched.
        self.cache = cmatch;

        let (shown, hidden) = pass.counts();
        span.record("shown", shown);
        span.record("hidden", hidden);
        span.record("duration_us", start.elapsed().as_micros() as u64);
        debug!(
            target: "qform.cmatch",
            fields_changed = pass.queue.len(),
            shown,
            hidden,
            corrections = pass.corrections.len(),
            "visibility pass computed"
        );
        pass
    }

    fn resolve_field(
        &mut self,
        field: &str,
        entry: &ClassMatch,
        force: bool,
        cx: &PassContext<'_>,
        corrections: &mut BucketDiff,
    ) -> FieldVisibility {
        let bucket_len = cx.bucket.len_of(field);

        let mut vis = if entry.is_scalar() {
            let count = match (cx.rendered)(field) {
                Some(rendered) if rendered > 0 => rendered,
                _ => bucket_len,
            };
            vec![entry.is; count]
        } else {
            entry.indexes.clone()
        };

        let limit = if bucket_len > 0 { bucket_len } else { vis.len() };
        vis.truncate(limit);

        let previous = self.applied.remove(field).unwrap_or_default();
        let meta = cx.fields.meta(field);
        let mut fv = FieldVisibility {
            field: field.to_owned(),
            ..FieldVisibility::default()
        };

        for (index, &visible) in vis.iter().enumerate() {
            if !force && previous.get(index) == Some(&visible) {
                continue;
            }

            let action = Visibility::from_match(visible);
            fv.queue(action, index);

            let current = cx.bucket.value(field, index).map(String::as_str);
            match action {
                Visibility::Show => {
                    self.ledger.show(field, index);
                    if current == Some(cx.na_value) && meta.default != cx.na_value {
                        corrections.set(field, index, meta.default.clone());
                    }
                }
                Visibility::Hide => {
                    self.ledger.hide(field, index);
                    let newly_introduced = index >= previous.len();
                    if meta.na.is_applicable()
                        && newly_introduced
                        && current != Some(cx.na_value)
                    {
                        corrections.set(field, index, cx.na_value);
                    }
                }
            }
        }

        self.applied.insert(field.to_owned(), vis);
        fv
    }

    /// Drop the cached entries of `fields` so the next pass re-resolves them.
    ///
    /// Used when rows were added or removed: per-index elision still applies
    /// to indexes that were already tracked.
    pub fn invalidate<'f>(&mut self, fields: impl IntoIterator<Item = &'f str>) {
        let mut remaining: Vec<(String, ClassMatch)> = Vec::new();
        let stale: BTreeSet<&str> = fields.into_iter().collect();
        for (name, entry) in &self.cache {
            if !stale.contains(name.as_str()) {
                remaining.push((name.clone(), entry.clone()));
            }
        }
        self.cache = remaining.into_iter().collect();
    }

    /// Drop cache entries and applied vectors of `fields`; every index is
    /// treated as newly introduced on the next pass. The ledger is kept.
    pub fn forget<'f>(&mut self, fields: impl IntoIterator<Item = &'f str>) {
        let fields: Vec<&str> = fields.into_iter().collect();
        for field in &fields {
            self.applied.remove(*field);
        }
        self.invalidate(fields);
    }

    /// Row `index` of `field` went away; later indexes move down by one.
    pub fn remove_index(&mut self, field: &str, index: usize) {
        if let Some(applied) = self.applied.get_mut(field)
            && index < applied.len()
        {
            applied.remove(index);
        }
        self.ledger.remove_index(field, index);
    }

    /// Collect the hidden indexes of the active step's fields that must be
    /// reset, then clear the ledger.
    ///
    /// Retained fields are skipped. Per field, collection stops at the first
    /// index the bucket no longer holds.
    pub fn clear_cmatch_fields(
        &mut self,
        active: &BTreeSet<String>,
        bucket: &Bucket,
        fields: &FieldRegistry,
    ) -> ResetRequest {
        let mut request = ResetRequest::new();
        for field in self.ledger.fields() {
            if !active.contains(field) || fields.meta(field).retain {
                continue;
            }
            let len = bucket.len_of(field);
            let indexes: Vec<usize> = self
                .ledger
                .indexes(field)
                .into_iter()
                .take_while(|&index| index < len)
                .collect();
            if !indexes.is_empty() {
                request.insert(field.to_owned(), indexes);
            }
        }

        debug!(
            target: "qform.cmatch",
            fields = request.len(),
            "clearing classified fields"
        );
        self.ledger.clear();
        request
    }

    /// Forget the cache, applied vectors and ledger, as when the tracked
    /// field set is torn down.
    pub fn reset_tracking(&mut self) {
        self.cache = MatchMatrix::new();
        self.applied.clear();
        self.ledger.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use qform_core::{BucketData, FieldDiff, FieldMeta, NaPolicy, Slot};

    struct Fixture {
        active: BTreeSet<String>,
        bucket: Bucket,
        fields: FieldRegistry,
        rendered: BTreeMap<String, usize>,
    }

    impl Fixture {
        fn new(data: &[(&str, &[&str])]) -> Self {
            let data: BucketData = data
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect();
            Self {
                active: data.keys().cloned().collect(),
                bucket: Bucket::from_committed(data),
                fields: FieldRegistry::new(),
                rendered: BTreeMap::new(),
            }
        }

        fn run(&self, resolver: &mut VisibilityResolver, m: MatchMatrix, force: bool) -> VisibilityPass {
            let rendered = |field: &str| self.rendered.get(field).copied();
            let cx = PassContext {
                active: &self.active,
                bucket: &self.bucket,
                fields: &self.fields,
                na_value: "N/A",
                rendered: &rendered,
            };
            resolver.handle_class_match(m, force, &cx)
        }
    }

    fn vis(field: &str, show: &[usize], hide: &[usize]) -> FieldVisibility {
        FieldVisibility {
            field: field.into(),
            show: show.to_vec(),
            hide: hide.to_vec(),
        }
    }

    #[test]
    fn first_pass_queues_every_index() {
        let fx = Fixture::new(&[("vehicles", &["a", "b"])]);
        let mut resolver = VisibilityResolver::new();
        let pass = fx.run(
            &mut resolver,
            MatchMatrix::new().with("vehicles", ClassMatch::per_index(vec![true, false])),
            false,
        );
        assert_eq!(pass.queue, vec![vis("vehicles", &[0], &[1])]);
    }

    #[test]
    fn hide_only_changed_index() {
        let fx = Fixture::new(&[("vehicles", &["a", "b"])]);
        let mut resolver = VisibilityResolver::new();
        fx.run(
            &mut resolver,
            MatchMatrix::new().with("vehicles", ClassMatch::new(true, vec![true, true])),
            false,
        );

        let next = MatchMatrix::new().with("vehicles", ClassMatch::new(false, vec![false, true]));
        let pass = fx.run(&mut resolver, next.clone(), false);
        assert_eq!(pass.queue, vec![vis("vehicles", &[], &[0])]);
        assert!(resolver.ledger().contains("vehicles", 0));
        assert!(!resolver.ledger().contains("vehicles", 1));
        assert_eq!(resolver.cache(), &next);
    }

    #[test]
    fn identical_matrix_is_a_noop() {
        let fx = Fixture::new(&[("x", &["1", "2"])]);
        let mut resolver = VisibilityResolver::new();
        let m = MatchMatrix::new().with("x", ClassMatch::per_index(vec![false, true]));
        assert!(!fx.run(&mut resolver, m.clone(), false).queue.is_empty());
        assert!(fx.run(&mut resolver, m, false).queue.is_empty());
    }

    #[test]
    fn force_requeues_unchanged_matrix() {
        let fx = Fixture::new(&[("x", &["1", "2"])]);
        let mut resolver = VisibilityResolver::new();
        let m = MatchMatrix::new().with("x", ClassMatch::per_index(vec![false, true]));
        fx.run(&mut resolver, m.clone(), false);
        let pass = fx.run(&mut resolver, m, true);
        assert_eq!(pass.queue, vec![vis("x", &[1], &[0])]);
    }

    #[test]
    fn scalar_broadcasts_over_bucket_indexes() {
        let fx = Fixture::new(&[("x", &["1", "2", "3"])]);
        let mut resolver = VisibilityResolver::new();
        let pass = fx.run(&mut resolver, MatchMatrix::new().with("x", ClassMatch::scalar(true)), false);
        assert_eq!(pass.queue, vec![vis("x", &[0, 1, 2], &[])]);
    }

    #[test]
    fn scalar_prefers_rendered_count_then_clamps_to_bucket() {
        let mut fx = Fixture::new(&[("x", &["1", "2", "3"])]);
        fx.rendered.insert("x".into(), 2);
        let mut resolver = VisibilityResolver::new();
        let pass = fx.run(&mut resolver, MatchMatrix::new().with("x", ClassMatch::scalar(false)), false);
        assert_eq!(pass.queue, vec![vis("x", &[], &[0, 1])]);

        fx.rendered.insert("x".into(), 5);
        resolver.reset_tracking();
        let pass = fx.run(&mut resolver, MatchMatrix::new().with("x", ClassMatch::scalar(false)), false);
        assert_eq!(pass.queue, vec![vis("x", &[], &[0, 1, 2])]);
    }

    #[test]
    fn vector_clamped_to_bucket_length() {
        let fx = Fixture::new(&[("x", &["1"])]);
        let mut resolver = VisibilityResolver::new();
        let pass = fx.run(
            &mut resolver,
            MatchMatrix::new().with("x", ClassMatch::per_index(vec![true, false, false])),
            false,
        );
        assert_eq!(pass.queue, vec![vis("x", &[0], &[])]);
    }

    #[test]
    fn vector_kept_when_bucket_has_no_indexes() {
        let mut fx = Fixture::new(&[]);
        fx.active.insert("fresh".into());
        let mut resolver = VisibilityResolver::new();
        let pass = fx.run(
            &mut resolver,
            MatchMatrix::new().with("fresh", ClassMatch::per_index(vec![true, false])),
            false,
        );
        assert_eq!(pass.queue, vec![vis("fresh", &[0], &[1])]);
    }

    #[test]
    fn inactive_fields_skipped_but_cached() {
        let mut fx = Fixture::new(&[("x", &["1"]), ("y", &["1"])]);
        fx.active.remove("y");
        let mut resolver = VisibilityResolver::new();
        let m = MatchMatrix::new()
            .with("x", ClassMatch::scalar(false))
            .with("y", ClassMatch::scalar(false));
        let pass = fx.run(&mut resolver, m.clone(), false);
        assert_eq!(pass.queue, vec![vis("x", &[], &[0])]);
        assert_eq!(resolver.cache(), &m);
    }

    #[test]
    fn ledger_tracks_hide_then_show() {
        let fx = Fixture::new(&[("f", &["a", "b", "c", "d"])]);
        let mut resolver = VisibilityResolver::new();
        fx.run(
            &mut resolver,
            MatchMatrix::new().with("f", ClassMatch::per_index(vec![true, false, true, false])),
            false,
        );
        assert_eq!(resolver.ledger().indexes("f"), vec![1, 3]);

        fx.run(
            &mut resolver,
            MatchMatrix::new().with("f", ClassMatch::per_index(vec![true, true, true, false])),
            false,
        );
        assert_eq!(resolver.ledger().indexes("f"), vec![3]);
    }

    #[test]
    fn ledger_keeps_first_hide_order() {
        let mut ledger = HiddenIndexLedger::new();
        ledger.hide("f", 3);
        ledger.hide("f", 1);
        ledger.hide("f", 3);
        assert_eq!(ledger.order("f", 3), Some(0));
        assert_eq!(ledger.order("f", 1), Some(1));
        ledger.show("f", 3);
        ledger.show("f", 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn ledger_remove_index_shifts_later_entries() {
        let mut ledger = HiddenIndexLedger::new();
        ledger.hide("f", 0);
        ledger.hide("f", 2);
        ledger.hide("f", 3);
        ledger.remove_index("f", 2);
        assert_eq!(ledger.indexes("f"), vec![0, 2]);
        assert_eq!(ledger.order("f", 2), Some(2), "old index 3 keeps its order");
    }

    #[test]
    fn removed_row_shifts_applied_state() {
        let mut fx = Fixture::new(&[("x", &["1", "2", "3"])]);
        let mut resolver = VisibilityResolver::new();
        fx.run(
            &mut resolver,
            MatchMatrix::new().with("x", ClassMatch::per_index(vec![true, false, true])),
            false,
        );

        fx.bucket.set_data(BucketDiff::new().with(
            "x",
            [Slot::Unchanged, Slot::Set("3"), Slot::Removed].into_iter().collect(),
        ));
        resolver.remove_index("x", 1);
        resolver.invalidate(["x"]);
        assert_eq!(resolver.applied("x"), Some(&[true, true][..]));
        assert!(resolver.ledger().is_empty());

        let pass = fx.run(
            &mut resolver,
            MatchMatrix::new().with("x", ClassMatch::per_index(vec![true, true])),
            false,
        );
        assert!(pass.queue.is_empty(), "surviving rows already shown");
    }

    #[test]
    fn forget_treats_indexes_as_new() {
        let mut fx = Fixture::new(&[("z", &["a"])]);
        fx.fields.insert("z", FieldMeta::default().na(NaPolicy::OnHide));
        let mut resolver = VisibilityResolver::new();
        let m = MatchMatrix::new().with("z", ClassMatch::scalar(true));
        fx.run(&mut resolver, m, false);
        resolver.forget(["z"]);
        assert!(resolver.applied("z").is_none());

        let pass = fx.run(&mut resolver, MatchMatrix::new().with("z", ClassMatch::scalar(false)), false);
        assert_eq!(pass.corrections.get("z"), Some(&FieldDiff::set_at(0, "N/A")));
    }

    #[test]
    fn newly_introduced_hidden_index_gets_na() {
        let mut fx = Fixture::new(&[("garage", &["12345", "67890"])]);
        fx.fields.insert("garage", FieldMeta::default().na(NaPolicy::OnHide));
        let mut resolver = VisibilityResolver::new();
        fx.run(
            &mut resolver,
            MatchMatrix::new().with("garage", ClassMatch::per_index(vec![true])),
            false,
        );

        let pass = fx.run(
            &mut resolver,
            MatchMatrix::new().with("garage", ClassMatch::per_index(vec![false, false])),
            false,
        );
        assert_eq!(pass.queue, vec![vis("garage", &[], &[0, 1])]);
        assert_eq!(
            pass.corrections,
            BucketDiff::new().with("garage", FieldDiff::set_at(1, "N/A")),
            "index 0 was tracked, so its user value survives"
        );
    }

    #[test]
    fn shown_na_restored_to_default() {
        let mut fx = Fixture::new(&[("garage", &["N/A"])]);
        fx.fields.insert("garage", FieldMeta::with_default("none").na(NaPolicy::OnHide));
        let mut resolver = VisibilityResolver::new();
        let pass = fx.run(&mut resolver, MatchMatrix::new().with("garage", ClassMatch::scalar(true)), false);
        assert_eq!(
            pass.corrections,
            BucketDiff::new().with("garage", FieldDiff::set_at(0, "none"))
        );
    }

    #[test]
    fn fields_without_na_policy_get_no_hide_corrections() {
        let fx = Fixture::new(&[("name", &["Ann"])]);
        let mut resolver = VisibilityResolver::new();
        let pass = fx.run(&mut resolver, MatchMatrix::new().with("name", ClassMatch::scalar(false)), false);
        assert!(pass.corrections.is_empty());
    }

    #[test]
    fn invalidate_reprocesses_only_new_indexes() {
        let mut fx = Fixture::new(&[("x", &["1"])]);
        let mut resolver = VisibilityResolver::new();
        let m = MatchMatrix::new().with("x", ClassMatch::scalar(false));
        fx.run(&mut resolver, m.clone(), false);

        fx.bucket.set_data(BucketDiff::new().with("x", FieldDiff::set_at(1, "2")));
        assert!(fx.run(&mut resolver, m.clone(), false).queue.is_empty());

        resolver.invalidate(["x"]);
        let pass = fx.run(&mut resolver, m, false);
        assert_eq!(pass.queue, vec![vis("x", &[], &[1])]);
    }

    #[test]
    fn clear_collects_active_unretained_until_bucket_end() {
        let mut fx = Fixture::new(&[("a", &["1", "2", "3"]), ("kept", &["1"]), ("off", &["1"])]);
        fx.fields.insert("kept", FieldMeta::default().retained());
        fx.active.remove("off");
        let mut resolver = VisibilityResolver::new();
        fx.active.insert("off".into());
        fx.run(
            &mut resolver,
            MatchMatrix::new()
                .with("a", ClassMatch::per_index(vec![true, false, false]))
                .with("kept", ClassMatch::scalar(false))
                .with("off", ClassMatch::scalar(false)),
            false,
        );
        fx.active.remove("off");

        fx.bucket.set_data(BucketDiff::new().with("a", FieldDiff::truncate_at(2)));
        let request = resolver.clear_cmatch_fields(&fx.active, &fx.bucket, &fx.fields);

        let expected: ResetRequest = [("a".to_string(), vec![1])].into_iter().collect();
        assert_eq!(request, expected);
        assert!(resolver.ledger().is_empty());
    }

    #[test]
    fn reset_tracking_forgets_everything() {
        let fx = Fixture::new(&[("x", &["1"])]);
        let mut resolver = VisibilityResolver::new();
        let m = MatchMatrix::new().with("x", ClassMatch::scalar(false));
        fx.run(&mut resolver, m.clone(), false);
        resolver.reset_tracking();
        assert!(resolver.cache().is_empty());
        assert!(resolver.ledger().is_empty());
        assert_eq!(fx.run(&mut resolver, m, false).queue, vec![vis("x", &[], &[0])]);
    }
}
