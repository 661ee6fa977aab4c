#![forbid(unsafe_code)]

//! Deferred-task queue with batch flush semantics.
//!
//! Side effects that must wait for the current synchronous pass to finish
//! (bucket corrections raised by a visibility pass, writes requested by UI
//! handlers, follow-up classification) are queued here and flushed later,
//! one batch at a time.
//!
//! # Usage
//!
//! ```ignore
//! let mut scheduler = Scheduler::new();
//! scheduler.defer(Task::A);
//! scheduler.defer_keyed("classify", Task::B);
//!
//! while let Some(batch) = scheduler.take_batch() {
//!     for task in batch {
//!         // anything deferred here lands in the *next* batch
//!     }
//! }
//! ```
//!
//! # Invariants
//!
//! 1. Tasks run in the order they were first enqueued within a batch.
//! 2. Work deferred while a batch is being processed goes to the next batch,
//!    never into the one being processed.
//! 3. A keyed task replaces an earlier pending task with the same key and
//!    keeps that task's queue position (the latest task wins).
//! 4. There is no cancellation: a taken batch is the caller's to finish.

use std::fmt;

/// Key used to coalesce deferred tasks.
pub type TaskKey = &'static str;

struct Entry<T> {
    key: Option<TaskKey>,
    task: T,
}

/// Single-threaded FIFO of deferred tasks, flushed in batches.
pub struct Scheduler<T> {
    pending: Vec<Entry<T>>,
    batches_taken: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending.len())
            .field("batches_taken", &self.batches_taken)
            .finish()
    }
}

impl<T> Scheduler<T> {
    /// Create an idle scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            batches_taken: 0,
        }
    }

    /// Queue `task` for the next batch.
    pub fn defer(&mut self, task: T) {
        self.pending.push(Entry { key: None, task });
    }

    /// Queue `task` under `key`, superseding any pending task with that key.
    ///
    /// Returns `true` when an earlier task was replaced.
    pub fn defer_keyed(&mut self, key: TaskKey, task: T) -> bool {
        if let Some(entry) = self.pending.iter_mut().find(|e| e.key == Some(key)) {
            entry.task = task;
            true
        } else {
            self.pending.push(Entry {
                key: Some(key),
                task,
            });
            false
        }
    }

    /// Number of tasks waiting for the next batch.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total batches handed out so far.
    #[must_use]
    pub fn batches_taken(&self) -> u64 {
        self.batches_taken
    }

    /// Take everything pending as one batch, leaving the queue empty for
    /// whatever the batch defers.
    pub fn take_batch(&mut self) -> Option<Batch<T>> {
        if self.pending.is_empty() {
            return None;
        }
        self.batches_taken += 1;
        let tasks = std::mem::take(&mut self.pending)
            .into_iter()
            .map(|entry| entry.task)
            .collect();
        Some(Batch {
            seq: self.batches_taken,
            tasks,
        })
    }

    /// Drop all pending tasks. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

/// One flush worth of tasks, in enqueue order.
#[derive(Debug)]
pub struct Batch<T> {
    seq: u64,
    tasks: Vec<T>,
}

impl<T> Batch<T> {
    /// 1-based sequence number of this batch.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Number of tasks in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
