#![forbid(unsafe_code)]

//! Per-field metadata: declared defaults and "not applicable" conventions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diff::Value;

/// When a field is cleared to the N/A sentinel instead of its default.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaPolicy {
    /// Always reset to the declared default.
    #[default]
    Never,
    /// N/A wherever the field itself is hidden.
    OnHide,
    /// N/A wherever the named class matches.
    WhenClass(String),
}

impl NaPolicy {
    /// Whether the field follows any N/A convention.
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        !matches!(self, NaPolicy::Never)
    }
}

/// Declared behavior of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMeta {
    /// Value restored on reset; empty when undeclared.
    pub default: Value,
    /// N/A convention.
    pub na: NaPolicy,
    /// Keep hidden values when the step's classified fields are cleared.
    pub retain: bool,
}

static UNDECLARED: FieldMeta = FieldMeta {
    default: Value::new(),
    na: NaPolicy::Never,
    retain: false,
};

impl FieldMeta {
    /// Metadata with a declared default.
    #[must_use]
    pub fn with_default(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            ..Self::default()
        }
    }

    /// Set the N/A policy.
    #[must_use]
    pub fn na(mut self, na: NaPolicy) -> Self {
        self.na = na;
        self
    }

    /// Mark the field as retained across clears.
    #[must_use]
    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

/// Lookup table of field metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldRegistry {
    fields: BTreeMap<String, FieldMeta>,
}

impl FieldRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, meta: FieldMeta) -> Self {
        self.insert(name, meta);
        self
    }

    /// Insert or replace metadata for `name`.
    pub fn insert(&mut self, name: impl Into<String>, meta: FieldMeta) {
        self.fields.insert(name.into(), meta);
    }

    /// Metadata for `name`; undeclared fields get the empty default.
    #[must_use]
    pub fn meta(&self, name: &str) -> &FieldMeta {
        self.fields.get(name).unwrap_or(&UNDECLARED)
    }

    /// Whether `name` was declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Declared field names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_fields_default_to_empty() {
        let registry = FieldRegistry::new();
        let meta = registry.meta("anything");
        assert_eq!(meta.default, "");
        assert_eq!(meta.na, NaPolicy::Never);
        assert!(!meta.retain);
    }

    #[test]
    fn builder_sets_policy() {
        let registry = FieldRegistry::new().with(
            "garage_zip",
            FieldMeta::with_default("00000")
                .na(NaPolicy::WhenClass("no_garage".into()))
                .retained(),
        );
        let meta = registry.meta("garage_zip");
        assert!(meta.na.is_applicable());
        assert!(meta.retain);
        assert!(registry.contains("garage_zip"));
    }
}
