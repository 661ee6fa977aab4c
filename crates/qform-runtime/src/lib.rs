#![forbid(unsafe_code)]

//! qform Runtime
//!
//! This crate turns classification results and bucket updates into UI work
//! for a multi-step, multi-row form.
//!
//! # Key Components
//!
//! - [`FormEngine`] - Single-owner driver for one form session
//! - [`VisibilityResolver`] - Diffs match matrices into show/hide deltas
//! - [`IndexTracker`] - Keeps materialized row counts in line with the bucket
//! - [`FieldResetter`] - Computes reset values for hidden fields
//! - [`Scheduler`] - Deferred work, flushed in batches
//! - [`UiSink`] - Receiver of [`UiEvent`]s
//! - [`FormSchema`] - Form layout and engine tuning, loadable from TOML/JSON
//!
//! # Role in qform
//! `qform-runtime` is the orchestrator. It applies diffs to the
//! `qform-core` bucket, asks a [`ClassificationProvider`] for a fresh
//! matrix, and raises `show`/`hide`/`indexAdd`/`indexRemove`/`indexReset`
//! events in a defined order.
//!
//! # How it fits in the system
//! Hosts own rendering and classification. They implement [`UiSink`] to
//! receive events and [`ClassificationProvider`] to supply matrices; the
//! engine sits between the two and is the only writer of the bucket.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod index_tracker;
pub mod resetter;
pub mod scheduler;
pub mod sink;
pub mod visibility;

pub use classifier::ClassificationProvider;
pub use config::{
    DEFAULT_MAX_CASCADE_BATCHES, DEFAULT_NA_VALUE, EngineConfig, FormSchema, GroupConfig,
    StepConfig,
};
pub use engine::FormEngine;
pub use error::{ConfigError, EngineError, Result};
pub use index_tracker::{IndexOp, IndexTracker, Reconcile};
pub use resetter::{FieldResetter, ResetRequest};
pub use scheduler::{Batch, Scheduler, TaskKey};
pub use sink::{DispatchCx, NullSink, Phase, UiEvent, UiSink, Visibility};
pub use visibility::{
    FieldVisibility, HiddenIndexLedger, PassContext, VisibilityPass, VisibilityResolver,
};
