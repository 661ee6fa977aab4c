#![forbid(unsafe_code)]

//! Form layout and engine tuning as data.
//!
//! A [`FormSchema`] describes everything the engine needs to know about a
//! form: field metadata, row groups, steps, and engine parameters. It can be
//! built in code or loaded from TOML or JSON at startup.
//!
//! ```toml
//! [engine]
//! na_value = "N/A"
//! initial_step = "vehicles"
//!
//! [fields.garage_zip]
//! default = ""
//! na = { when_class = "no_garage" }
//!
//! [[steps]]
//! id = "vehicles"
//! fields = ["vin", "garage_zip"]
//!
//! [[groups]]
//! id = "vehicle_group"
//! step = "vehicles"
//! fields = ["vin", "garage_zip"]
//! min_rows = 1
//! max_rows = 6
//! ```
//!
//! # Defaults
//!
//! Every section is optional; `FormSchema::default()` is an empty form with
//! the default [`EngineConfig`].

use std::collections::BTreeSet;
use std::path::Path;

use qform_core::FieldRegistry;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default bound on scheduler batches per settle.
pub const DEFAULT_MAX_CASCADE_BATCHES: usize = 32;

/// Default "not applicable" sentinel.
pub const DEFAULT_NA_VALUE: &str = "N/A";

/// Engine tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Value written to fields that do not apply.
    pub na_value: String,
    /// Scheduler batches allowed before deferred work is declared runaway.
    pub max_cascade_batches: usize,
    /// Step displayed first; the first declared step when unset.
    pub initial_step: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            na_value: DEFAULT_NA_VALUE.to_owned(),
            max_cascade_batches: DEFAULT_MAX_CASCADE_BATCHES,
            initial_step: None,
        }
    }
}

/// A multi-row field group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub id: String,
    /// Step that displays the group.
    pub step: String,
    /// Member fields; the first one drives the row count.
    pub fields: Vec<String>,
    pub min_rows: usize,
    /// Upper bound on rows; 0 means unbounded.
    pub max_rows: usize,
}

impl GroupConfig {
    /// Field whose length decides how many rows the group shows.
    #[must_use]
    pub fn length_field(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }
}

/// A step of the form and the fields exclusive to it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    pub id: String,
    pub fields: Vec<String>,
}

/// Complete description of a form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSchema {
    pub engine: EngineConfig,
    pub fields: FieldRegistry,
    pub steps: Vec<StepConfig>,
    pub groups: Vec<GroupConfig>,
}

impl FormSchema {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Check the schema for internal consistency.
    ///
    /// Returns every problem found; an empty vector means the schema is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.engine.na_value.is_empty() {
            errors.push("engine.na_value must not be empty".into());
        }
        if self.engine.max_cascade_batches == 0 {
            errors.push("engine.max_cascade_batches must be > 0".into());
        }

        let mut step_ids = BTreeSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                errors.push("steps: step id must not be empty".into());
            } else if !step_ids.insert(step.id.as_str()) {
                errors.push(format!("steps: duplicate step id {:?}", step.id));
            }
        }

        if let Some(initial) = &self.engine.initial_step
            && !step_ids.contains(initial.as_str())
        {
            errors.push(format!(
                "engine.initial_step {initial:?} does not name a step"
            ));
        }

        let mut group_ids = BTreeSet::new();
        let mut grouped_fields = BTreeSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id.as_str()) {
                errors.push(format!("groups: duplicate group id {:?}", group.id));
            }
            if group.fields.is_empty() {
                errors.push(format!("groups.{}: must list at least one field", group.id));
            }
            if !step_ids.contains(group.step.as_str()) {
                errors.push(format!(
                    "groups.{}: step {:?} does not name a step",
                    group.id, group.step
                ));
            }
            if group.max_rows != 0 && group.max_rows < group.min_rows {
                errors.push(format!(
                    "groups.{}: max_rows ({}) must be >= min_rows ({})",
                    group.id, group.max_rows, group.min_rows
                ));
            }
            for field in &group.fields {
                if !grouped_fields.insert(field.as_str()) {
                    errors.push(format!(
                        "groups.{}: field {field:?} already belongs to another group",
                        group.id
                    ));
                }
            }
        }

        errors
    }

    /// Consume the schema, failing if [`validate`](Self::validate) reports problems.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Exclusive fields of `step`, including the fields of its groups.
    #[must_use]
    pub fn step_fields(&self, step: &str) -> BTreeSet<String> {
        let declared = self
            .steps
            .iter()
            .filter(|s| s.id == step)
            .flat_map(|s| s.fields.iter());
        let grouped = self
            .groups
            .iter()
            .filter(|g| g.step == step)
            .flat_map(|g| g.fields.iter());
        declared.chain(grouped).cloned().collect()
    }
}
