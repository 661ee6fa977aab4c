#![forbid(unsafe_code)]

//! Events raised toward the rendering layer.
//!
//! The engine never touches a UI directly. It hands [`UiEvent`]s to a
//! [`UiSink`] together with a [`DispatchCx`], through which the handler may
//! ask for follow-up work. Follow-ups never run inside the dispatch itself:
//! writes are deferred to the scheduler, and a synchronous re-classification
//! requested while a visibility pass is being applied is a recursion error.

use qform_core::BucketDiff;

/// Whether a visibility pass is currently being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Applying,
}

/// Visibility action for a set of indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Show,
    Hide,
}

impl Visibility {
    /// Action for a match result: matched indexes are shown.
    #[must_use]
    pub fn from_match(matched: bool) -> Self {
        if matched { Self::Show } else { Self::Hide }
    }

    /// Stable event name, as used by rendering layers.
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Hide => "hide",
        }
    }
}

/// An event for the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Show or hide `indexes` of `field`.
    Visibility {
        field: String,
        action: Visibility,
        indexes: Vec<usize>,
    },
    /// Externally registered population hooks for `field` should run.
    DataApiTrigger { field: String },
    /// A row was materialized at `index`.
    IndexAdd { group: String, index: usize },
    /// The row at `index` was removed.
    IndexRemove { group: String, index: usize },
    /// The row at `index` was torn down for a group reset.
    IndexReset { group: String, index: usize },
}

impl UiEvent {
    /// Stable event name, as used by rendering layers.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Visibility { action, .. } => action.event_name(),
            Self::DataApiTrigger { .. } => "dapi",
            Self::IndexAdd { .. } => "indexAdd",
            Self::IndexRemove { .. } => "indexRemove",
            Self::IndexReset { .. } => "indexReset",
        }
    }
}

/// Follow-up requests collected while a sink handles events.
#[derive(Debug, Default)]
pub struct DispatchCx {
    phase: Phase,
    deferred: Vec<BucketDiff>,
    classify_requested: bool,
    recursion: bool,
}

impl DispatchCx {
    pub(crate) fn new(phase: Phase) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }

    /// Phase of the engine while this event is being handled.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Queue a bucket write; it is applied on the next scheduler flush.
    pub fn set_data(&mut self, diff: BucketDiff) {
        self.deferred.push(diff);
    }

    /// Ask for classification to be re-applied as soon as this dispatch
    /// returns.
    ///
    /// While a visibility pass is being applied this is a recursion: the
    /// request is refused and the pass fails with
    /// [`EngineError::ClassificationRecursion`](crate::EngineError::ClassificationRecursion).
    pub fn classify_now(&mut self) -> bool {
        match self.phase {
            Phase::Applying => {
                self.recursion = true;
                false
            }
            Phase::Idle => {
                self.classify_requested = true;
                true
            }
        }
    }

    pub(crate) fn recursion_detected(&self) -> bool {
        self.recursion
    }

    pub(crate) fn into_requests(self) -> (Vec<BucketDiff>, bool) {
        (self.deferred, self.classify_requested)
    }
}

/// Receiver of engine events.
pub trait UiSink {
    fn dispatch(&mut self, event: &UiEvent, cx: &mut DispatchCx);
}

/// Records every event; useful for headless hosts and tests.
impl UiSink for Vec<UiEvent> {
    fn dispatch(&mut self, event: &UiEvent, _cx: &mut DispatchCx) {
        self.push(event.clone());
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl UiSink for NullSink {
    fn dispatch(&mut self, _event: &UiEvent, _cx: &mut DispatchCx) {}
}
