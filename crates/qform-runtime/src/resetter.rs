#![forbid(unsafe_code)]

//! Target values for cleared fields.
//!
//! A reset puts a field index back to what it should hold when the user has
//! not answered it: the N/A sentinel when the field's N/A policy applies at
//! that index, the declared default otherwise. Positions already holding
//! their target are left out of the resulting diff.

use std::collections::BTreeMap;

use qform_core::{Bucket, BucketDiff, FieldRegistry, MatchMatrix, NaPolicy};

/// Indexes to reset, per field.
pub type ResetRequest = BTreeMap<String, Vec<usize>>;

/// Computes reset diffs from field metadata and the last match matrix.
#[derive(Debug, Clone)]
pub struct FieldResetter {
    fields: FieldRegistry,
    na_value: String,
}

impl FieldResetter {
    #[must_use]
    pub fn new(fields: FieldRegistry, na_value: impl Into<String>) -> Self {
        Self {
            fields,
            na_value: na_value.into(),
        }
    }

    /// Field metadata used for targets.
    #[must_use]
    pub fn fields(&self) -> &FieldRegistry {
        &self.fields
    }

    /// The N/A sentinel.
    #[must_use]
    pub fn na_value(&self) -> &str {
        &self.na_value
    }

    /// Value `field[index]` should hold after a reset.
    #[must_use]
    pub fn target(&self, field: &str, index: usize, cmatch: &MatchMatrix) -> &str {
        let meta = self.fields.meta(field);
        let not_applicable = match &meta.na {
            NaPolicy::Never => false,
            NaPolicy::OnHide => cmatch.get(field).is_some_and(|m| !m.at(index)),
            NaPolicy::WhenClass(class) => cmatch.matches_at(class, index),
        };
        if not_applicable {
            &self.na_value
        } else {
            &meta.default
        }
    }

    /// Build the diff resetting every requested index.
    #[must_use]
    pub fn reset(&self, requests: &ResetRequest, bucket: &Bucket, cmatch: &MatchMatrix) -> BucketDiff {
        let mut diff = BucketDiff::new();
        for (field, indexes) in requests {
            for &index in indexes {
                let target = self.target(field, index, cmatch);
                if bucket.value(field, index).map(String::as_str) == Some(target) {
                    continue;
                }
                diff.set(field, index, target);
            }
        }

        tracing::debug!(
            target: "qform.reset",
            requested = requests.values().map(Vec::len).sum::<usize>(),
            fields = diff.len(),
            "reset computed"
        );
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use qform_core::{BucketData, ClassMatch, FieldDiff, FieldMeta};

    fn resetter() -> FieldResetter {
        let fields = FieldRegistry::new()
            .with("color", FieldMeta::with_default("blue"))
            .with("garage_zip", FieldMeta::default().na(NaPolicy::OnHide))
            .with(
                "sr22_state",
                FieldMeta::with_default("none").na(NaPolicy::WhenClass("no_sr22".into())),
            );
        FieldResetter::new(fields, "N/A")
    }

    fn bucket(entries: &[(&str, &[&str])]) -> Bucket {
        let data: BucketData = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect();
        Bucket::from_committed(data)
    }

    fn request(entries: &[(&str, &[usize])]) -> ResetRequest {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn default_when_no_policy() {
        let r = resetter();
        let cmatch = MatchMatrix::new();
        assert_eq!(r.target("color", 0, &cmatch), "blue");
        assert_eq!(r.target("undeclared", 0, &cmatch), "");
    }

    #[test]
    fn on_hide_uses_fields_own_match() {
        let r = resetter();
        let cmatch =
            MatchMatrix::new().with("garage_zip", ClassMatch::per_index(vec![true, false]));
        assert_eq!(r.target("garage_zip", 0, &cmatch), "");
        assert_eq!(r.target("garage_zip", 1, &cmatch), "N/A");
        assert_eq!(
            r.target("garage_zip", 0, &MatchMatrix::new()),
            "",
            "unclassified field is not hidden"
        );
    }

    #[test]
    fn when_class_uses_named_class() {
        let r = resetter();
        let cmatch = MatchMatrix::new().with("no_sr22", ClassMatch::scalar(true));
        assert_eq!(r.target("sr22_state", 3, &cmatch), "N/A");
        assert_eq!(r.target("sr22_state", 0, &MatchMatrix::new()), "none");
    }

    #[test]
    fn reset_omits_positions_already_at_target() {
        let r = resetter();
        let b = bucket(&[("color", &["blue", "red", "blue"])]);
        let diff = r.reset(&request(&[("color", &[0, 1, 2])]), &b, &MatchMatrix::new());
        assert_eq!(diff, BucketDiff::new().with("color", FieldDiff::set_at(1, "blue")));
    }

    #[test]
    fn reset_of_fully_clean_fields_is_empty() {
        let r = resetter();
        let b = bucket(&[("color", &["blue"])]);
        let diff = r.reset(&request(&[("color", &[0])]), &b, &MatchMatrix::new());
        assert!(diff.is_empty());
    }

    #[test]
    fn reset_writes_missing_indexes() {
        let r = resetter();
        let cmatch = MatchMatrix::new().with("no_sr22", ClassMatch::scalar(true));
        let diff = r.reset(&request(&[("sr22_state", &[0])]), &Bucket::new(), &cmatch);
        assert_eq!(diff.get("sr22_state"), Some(&FieldDiff::set_at(0, "N/A")));
    }
}
