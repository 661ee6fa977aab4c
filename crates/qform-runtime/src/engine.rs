#![forbid(unsafe_code)]

//! The single-owner driver wiring bucket, classification, visibility and
//! row reconciliation together.
//!
//! # Control flow
//!
//! ```text
//!   set_data(diff)
//!     │
//!     ├─► Bucket::set_data ──► normalized StagingUpdate
//!     │
//!     ├─► IndexTracker per touched length field ──► indexAdd / indexRemove
//!     │
//!     ├─► ClassificationProvider::classify(merged view)
//!     │
//!     └─► handle_class_match
//!           Phase::Applying
//!             cache := matrix
//!             show / hide / dapi per field
//!           Phase::Idle
//!           corrections ──► Scheduler
//!
//!   run_pending()
//!     batch 1: ApplyData(sink writes), ApplyData(corrections), Classify
//!     batch 2: whatever batch 1 deferred
//!     ...       until idle or max_cascade_batches
//! ```
//!
//! # Invariants
//!
//! 1. The visibility cache is replaced before any show/hide event of the
//!    pass is dispatched.
//! 2. Bucket corrections computed by a pass are applied only after every
//!    event of that pass was dispatched, through the scheduler.
//! 3. A sink asking for synchronous classification while a pass is being
//!    applied fails the pass with [`EngineError::ClassificationRecursion`].
//!    Every field of a failed pass is forgotten by the resolver, so the next
//!    pass re-emits it.
//!
//! # Failure Modes
//!
//! | Condition | Outcome |
//! |-----------|---------|
//! | classification re-entered mid-pass | `Err(ClassificationRecursion)` |
//! | deferred work never settles | `Err(CascadeLimit)`, queue dropped |
//! | field classified but not on the active step | skipped |
//! | row add at `max_rows` / remove at `min_rows` | `Ok(false)` |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use qform_core::{Bucket, BucketDiff, FieldDiff, MatchMatrix, StagingSubscription, StagingUpdate};
use tracing::{debug, debug_span, error, warn};
use web_time::Instant;

use crate::classifier::ClassificationProvider;
use crate::config::{EngineConfig, FormSchema, GroupConfig};
use crate::error::{EngineError, Result};
use crate::index_tracker::{IndexOp, IndexTracker};
use crate::resetter::FieldResetter;
use crate::scheduler::{Scheduler, TaskKey};
use crate::sink::{DispatchCx, Phase, UiEvent, UiSink, Visibility};
use crate::visibility::{FieldVisibility, PassContext, VisibilityPass, VisibilityResolver};

const CLASSIFY_TASK: TaskKey = "classify";

/// Work deferred to the next scheduler flush.
#[derive(Debug)]
enum Task {
    ApplyData(BucketDiff),
    Classify,
}

/// Owns one form session.
pub struct FormEngine {
    config: EngineConfig,
    bucket: Bucket,
    classifier: Box<dyn ClassificationProvider>,
    resolver: VisibilityResolver,
    resetter: FieldResetter,
    groups: BTreeMap<String, GroupConfig>,
    trackers: BTreeMap<String, IndexTracker>,
    field_groups: BTreeMap<String, String>,
    step_fields: BTreeMap<String, BTreeSet<String>>,
    step_order: Vec<String>,
    active_step: Option<String>,
    active_fields: BTreeSet<String>,
    scheduler: Scheduler<Task>,
}

impl fmt::Debug for FormEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormEngine")
            .field("active_step", &self.active_step)
            .field("groups", &self.trackers.len())
            .field("bucket_version", &self.bucket.version())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl FormEngine {
    /// Build an engine for `schema` over `bucket`.
    ///
    /// No events are raised until [`start`](Self::start).
    pub fn new(
        schema: FormSchema,
        bucket: Bucket,
        classifier: impl ClassificationProvider + 'static,
    ) -> Result<Self> {
        let schema = schema.validated()?;

        let step_fields = schema
            .steps
            .iter()
            .map(|step| (step.id.clone(), schema.step_fields(&step.id)))
            .collect();
        let step_order = schema.steps.iter().map(|step| step.id.clone()).collect();

        let mut trackers = BTreeMap::new();
        let mut field_groups = BTreeMap::new();
        for group in &schema.groups {
            let Some(length_field) = group.length_field() else {
                continue;
            };
            trackers.insert(
                group.id.clone(),
                IndexTracker::new(&group.id, length_field, group.min_rows, group.max_rows),
            );
            for field in &group.fields {
                field_groups.insert(field.clone(), group.id.clone());
            }
        }
        let groups = schema
            .groups
            .into_iter()
            .map(|group| (group.id.clone(), group))
            .collect();

        let FormSchema { engine, fields, .. } = schema;
        Ok(Self {
            resetter: FieldResetter::new(fields, engine.na_value.clone()),
            config: engine,
            bucket,
            classifier: Box::new(classifier),
            resolver: VisibilityResolver::new(),
            groups,
            trackers,
            field_groups,
            step_fields,
            step_order,
            active_step: None,
            active_fields: BTreeSet::new(),
            scheduler: Scheduler::new(),
        })
    }

    /// Seed row counts from the bucket and display the initial step.
    ///
    /// Without any step, classification is applied straight away.
    pub fn start(&mut self, sink: &mut dyn UiSink) -> Result<()> {
        let mut seeded = Vec::new();
        for (group, tracker) in &mut self.trackers {
            let len = self.bucket.len_of(tracker.length_field());
            // Inactive trackers only stash the target.
            let ops = tracker.init(len);
            if !ops.is_empty() {
                seeded.push((group.clone(), ops));
            }
        }
        for (group, ops) in seeded {
            self.emit_index_ops(&group, ops, sink)?;
        }

        let initial = self
            .config
            .initial_step
            .clone()
            .or_else(|| self.step_order.first().cloned());
        match initial {
            Some(step) => self.navigate(&step, sink),
            None => self.classify(sink),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    #[must_use]
    pub fn resolver(&self) -> &VisibilityResolver {
        &self.resolver
    }

    /// The last applied match matrix.
    #[must_use]
    pub fn cmatch(&self) -> &MatchMatrix {
        self.resolver.cache()
    }

    #[must_use]
    pub fn tracker(&self, group: &str) -> Option<&IndexTracker> {
        self.trackers.get(group)
    }

    #[must_use]
    pub fn active_step(&self) -> Option<&str> {
        self.active_step.as_deref()
    }

    /// Exclusive fields of the active step.
    #[must_use]
    pub fn active_fields(&self) -> &BTreeSet<String> {
        &self.active_fields
    }

    /// Tasks waiting for [`run_pending`](Self::run_pending).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Rows the UI shows for `field`, when it belongs to an active group.
    #[must_use]
    pub fn rendered_count(&self, field: &str) -> Option<usize> {
        rendered_count(&self.field_groups, &self.trackers, field)
    }

    /// Register a hook that may rewrite every diff before it is merged.
    pub fn on_pre_data_update(&mut self, hook: impl FnMut(&mut BucketDiff) + 'static) {
        self.bucket.on_pre_data_update(hook);
    }

    /// Subscribe to normalized bucket updates.
    pub fn subscribe(&mut self, callback: impl Fn(&StagingUpdate) + 'static) -> StagingSubscription {
        self.bucket.subscribe(callback)
    }

    // ========================================================================
    // Data path
    // ========================================================================

    /// Merge `diff` into the bucket, reconcile rows and re-apply
    /// classification.
    ///
    /// Corrections are only queued; call [`run_pending`](Self::run_pending)
    /// to settle them.
    pub fn set_data(&mut self, diff: BucketDiff, sink: &mut dyn UiSink) -> Result<Option<StagingUpdate>> {
        let Some(update) = self.bucket.set_data(diff) else {
            return Ok(None);
        };
        self.on_staging_update(&update.diff, sink)?;
        Ok(Some(update))
    }

    fn on_staging_update(&mut self, diff: &BucketDiff, sink: &mut dyn UiSink) -> Result<()> {
        let mut touched = Vec::new();
        for (group, tracker) in &mut self.trackers {
            let Some(field_diff) = diff.get(tracker.length_field()) else {
                continue;
            };
            let len = self.bucket.len_of(tracker.length_field());
            let ops = tracker.handle_index_change(field_diff, len);
            if !ops.is_empty() {
                touched.push((group.clone(), ops));
            }
        }
        for (group, ops) in touched {
            self.emit_index_ops(&group, ops, sink)?;
        }
        self.classify(sink)
    }

    /// Run the classifier over the merged bucket view and apply the result.
    pub fn classify(&mut self, sink: &mut dyn UiSink) -> Result<()> {
        let classifier = &self.classifier;
        let matrix = self.bucket.visit_data(|view| classifier.classify(view));
        self.handle_class_match(matrix, false, sink)
    }

    /// Apply a match matrix: diff it against the cache, dispatch show/hide
    /// and data-API events, and queue the resulting bucket corrections.
    pub fn handle_class_match(
        &mut self,
        cmatch: MatchMatrix,
        force: bool,
        sink: &mut dyn UiSink,
    ) -> Result<()> {
        let pass = {
            let field_groups = &self.field_groups;
            let trackers = &self.trackers;
            let rendered = |field: &str| rendered_count(field_groups, trackers, field);
            let cx = PassContext {
                active: &self.active_fields,
                bucket: &self.bucket,
                fields: self.resetter.fields(),
                na_value: &self.config.na_value,
                rendered: &rendered,
            };
            self.resolver.handle_class_match(cmatch, force, &cx)
        };

        let VisibilityPass { queue, corrections } = pass;
        if let Err(err) = self.dispatch_queue(&queue, sink) {
            // Incomplete pass: its fields resolve from scratch next time.
            self.resolver.forget(queue.iter().map(|entry| entry.field.as_str()));
            return Err(err);
        }

        if !corrections.is_empty() {
            self.scheduler.defer(Task::ApplyData(corrections));
        }
        Ok(())
    }

    fn dispatch_queue(&mut self, queue: &[FieldVisibility], sink: &mut dyn UiSink) -> Result<()> {
        for entry in queue {
            for action in [Visibility::Show, Visibility::Hide] {
                let indexes = entry.indexes(action);
                if indexes.is_empty() {
                    continue;
                }
                let event = UiEvent::Visibility {
                    field: entry.field.clone(),
                    action,
                    indexes: indexes.to_vec(),
                };
                self.emit(&event, Phase::Applying, sink)?;
            }
            let trigger = UiEvent::DataApiTrigger {
                field: entry.field.clone(),
            };
            self.emit(&trigger, Phase::Applying, sink)?;
        }
        Ok(())
    }

    /// Re-apply the cached matrix with `force`, re-emitting every index.
    ///
    /// For hosts that rebuilt their UI without a new classification run.
    pub fn force_cmatch_action(&mut self, sink: &mut dyn UiSink) -> Result<()> {
        let cmatch = self.resolver.cache().clone();
        self.handle_class_match(cmatch, true, sink)
    }

    /// Reset every hidden, non-retained index of the active step and clear
    /// the hidden-index ledger.
    pub fn clear_cmatch_fields(&mut self, sink: &mut dyn UiSink) -> Result<Option<StagingUpdate>> {
        let request = self.resolver.clear_cmatch_fields(
            &self.active_fields,
            &self.bucket,
            self.resetter.fields(),
        );
        if request.is_empty() {
            return Ok(None);
        }
        let diff = self.resetter.reset(&request, &self.bucket, self.resolver.cache());
        self.set_data(diff, sink)
    }

    /// Flush deferred work until the scheduler is idle.
    ///
    /// Returns the number of batches run.
    pub fn run_pending(&mut self, sink: &mut dyn UiSink) -> Result<usize> {
        let start = Instant::now();
        let mut batches = 0usize;
        while let Some(batch) = self.scheduler.take_batch() {
            batches += 1;
            if batches > self.config.max_cascade_batches {
                let dropped = batch.len() + self.scheduler.clear();
                warn!(
                    target: "qform.flush",
                    limit = self.config.max_cascade_batches,
                    dropped,
                    "deferred work did not settle"
                );
                return Err(EngineError::CascadeLimit {
                    batches: self.config.max_cascade_batches,
                });
            }

            let _span = debug_span!("qform.flush", seq = batch.seq(), tasks = batch.len()).entered();
            for task in batch {
                match task {
                    Task::ApplyData(diff) => {
                        self.set_data(diff, sink)?;
                    }
                    Task::Classify => self.classify(sink)?,
                }
            }
        }

        if batches > 0 {
            debug!(
                target: "qform.flush",
                batches,
                duration_us = start.elapsed().as_micros() as u64,
                "scheduler settled"
            );
        }
        Ok(batches)
    }

    // ========================================================================
    // Steps
    // ========================================================================

    /// Leave the current step and display `step`.
    pub fn navigate(&mut self, step: &str, sink: &mut dyn UiSink) -> Result<()> {
        let Some(fields) = self.step_fields.get(step).cloned() else {
            return Err(EngineError::unknown_step(step));
        };

        if self.active_step.is_some() {
            self.clear_cmatch_fields(sink)?;
        }
        self.resolver.reset_tracking();

        let previous = self.active_step.replace(step.to_owned());
        if let Some(previous) = previous.as_deref() {
            for group in self.groups.values().filter(|g| g.step == previous) {
                if let Some(tracker) = self.trackers.get_mut(&group.id) {
                    let _ = tracker.set_active(false);
                }
            }
        }
        self.active_fields = fields;
        debug!(target: "qform.engine", from = ?previous, to = step, "step activated");

        let entering: Vec<String> = self
            .groups
            .values()
            .filter(|g| g.step == step)
            .map(|g| g.id.clone())
            .collect();
        for group in entering {
            let ops = match self.trackers.get_mut(&group) {
                Some(tracker) => tracker.set_active(true),
                None => continue,
            };
            self.emit_index_ops(&group, ops, sink)?;
        }

        self.classify(sink)
    }

    /// Clear hidden fields, settle deferred work and commit the bucket.
    ///
    /// Returns the committed field names.
    pub fn save_step(&mut self, sink: &mut dyn UiSink) -> Result<Vec<String>> {
        self.clear_cmatch_fields(sink)?;
        self.run_pending(sink)?;
        Ok(self.bucket.commit())
    }

    /// Drop staged values and reconcile with the committed view.
    pub fn discard(&mut self, sink: &mut dyn UiSink) -> Result<Option<StagingUpdate>> {
        let Some(update) = self.bucket.revert() else {
            return Ok(None);
        };
        self.on_staging_update(&update.diff, sink)?;
        Ok(Some(update))
    }

    // ========================================================================
    // Rows
    // ========================================================================

    /// Append one row of field defaults to `group`.
    ///
    /// Returns `false` when the group is already at `max_rows`.
    pub fn add_row(&mut self, group: &str, sink: &mut dyn UiSink) -> Result<bool> {
        let (fields, len) = self.group_state(group)?;
        if !self.trackers.get(group).is_some_and(|t| t.can_grow(len)) {
            debug!(target: "qform.index", group, len, "row add rejected at max_rows");
            return Ok(false);
        }

        let mut diff = BucketDiff::new();
        for field in &fields {
            let default = self.resetter.fields().meta(field).default.clone();
            diff.set(field, len, default);
        }
        self.set_data(diff, sink)?;
        Ok(true)
    }

    /// Remove row `index` of `group`, moving later rows down.
    ///
    /// Returns `false` when the group is at `min_rows` or `index` is out of
    /// range.
    pub fn remove_row(&mut self, group: &str, index: usize, sink: &mut dyn UiSink) -> Result<bool> {
        let (fields, len) = self.group_state(group)?;
        if index >= len || !self.trackers.get(group).is_some_and(|t| t.can_shrink(len)) {
            debug!(target: "qform.index", group, index, len, "row remove rejected");
            return Ok(false);
        }

        let mut diff = BucketDiff::new();
        for field in &fields {
            let values = self.bucket.data_by_name(field);
            if index >= values.len() {
                continue;
            }
            let mut field_diff = FieldDiff::new();
            for (i, next) in values.iter().enumerate().skip(index + 1) {
                field_diff.set(i - 1, next.clone());
            }
            field_diff.remove(values.len() - 1);
            diff.insert(field.clone(), field_diff);
        }
        self.set_data(diff, sink)?;
        Ok(true)
    }

    /// Tear down and rebuild every row of `group`.
    pub fn reset_group(&mut self, group: &str, sink: &mut dyn UiSink) -> Result<()> {
        let (_, len) = self.group_state(group)?;
        let ops = match self.trackers.get_mut(group) {
            Some(tracker) => tracker.reset(len),
            None => return Err(EngineError::unknown_group(group)),
        };
        self.emit_index_ops(group, ops, sink)?;
        self.classify(sink)
    }

    fn group_state(&self, group: &str) -> Result<(Vec<String>, usize)> {
        let config = self
            .groups
            .get(group)
            .ok_or_else(|| EngineError::unknown_group(group))?;
        let len = config
            .length_field()
            .map_or(0, |field| self.bucket.len_of(field));
        Ok((config.fields.clone(), len))
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn emit_index_ops(&mut self, group: &str, ops: Vec<IndexOp>, sink: &mut dyn UiSink) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let fields: Vec<String> = self
            .groups
            .get(group)
            .map(|g| g.fields.clone())
            .unwrap_or_default();

        for op in ops {
            match op {
                IndexOp::Remove(index) => {
                    for field in &fields {
                        self.resolver.remove_index(field, index);
                    }
                }
                IndexOp::Reset(_) => self.resolver.forget(fields.iter().map(String::as_str)),
                IndexOp::Add(_) => {}
            }
            self.emit(&op.to_event(group), Phase::Idle, sink)?;
        }
        self.resolver.invalidate(fields.iter().map(String::as_str));
        Ok(())
    }

    fn emit(&mut self, event: &UiEvent, phase: Phase, sink: &mut dyn UiSink) -> Result<()> {
        let mut cx = DispatchCx::new(phase);
        sink.dispatch(event, &mut cx);
        if cx.recursion_detected() {
            error!(
                target: "qform.cmatch",
                event = event.name(),
                "classification re-entered while being applied"
            );
            return Err(EngineError::ClassificationRecursion);
        }

        let (deferred, classify) = cx.into_requests();
        for diff in deferred {
            self.scheduler.defer(Task::ApplyData(diff));
        }
        if classify {
            self.scheduler.defer_keyed(CLASSIFY_TASK, Task::Classify);
        }
        Ok(())
    }
}

fn rendered_count(
    field_groups: &BTreeMap<String, String>,
    trackers: &BTreeMap<String, IndexTracker>,
    field: &str,
) -> Option<usize> {
    let tracker = trackers.get(field_groups.get(field)?)?;
    tracker.is_active().then_some(tracker.index_count())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
