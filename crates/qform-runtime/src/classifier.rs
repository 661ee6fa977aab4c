#![forbid(unsafe_code)]

//! Seam to the external classification engine.

use qform_core::{BucketView, MatchMatrix};

/// Produces a match matrix from the current bucket contents.
///
/// Implementations are treated as pure functions of the bucket view.
pub trait ClassificationProvider {
    fn classify(&self, data: &BucketView<'_>) -> MatchMatrix;
}

impl<F> ClassificationProvider for F
where
    F: Fn(&BucketView<'_>) -> MatchMatrix,
{
    fn classify(&self, data: &BucketView<'_>) -> MatchMatrix {
        self(data)
    }
}
