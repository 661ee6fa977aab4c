#![forbid(unsafe_code)]

//! Core: the session data layer for qform.
//!
//! # Role in qform
//! `qform-core` owns the data the rest of the engine reasons about: the
//! staging [`Bucket`] of field values, the explicit [`BucketDiff`] model
//! used to change it, the classifier's [`MatchMatrix`], and per-field
//! [`FieldMeta`].
//!
//! # How it fits in the system
//! `qform-runtime` drives everything in this crate: it merges diffs into the
//! bucket, feeds the merged view to a classifier, and turns the resulting
//! matrix into visibility and row-count changes. Nothing here schedules or
//! dispatches; every operation is synchronous and side-effect free apart
//! from staging subscribers.

pub mod bucket;
pub mod cmatch;
pub mod diff;
pub mod field;

pub use bucket::{Bucket, BucketData, BucketView, StagingSubscription, StagingUpdate};
pub use cmatch::{ClassMatch, MatchMatrix};
pub use diff::{BucketDiff, FieldDiff, Slot, Value};
pub use field::{FieldMeta, FieldRegistry, NaPolicy};
