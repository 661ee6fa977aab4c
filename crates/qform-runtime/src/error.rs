#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures the engine surfaces to its caller.
///
/// Missing UI mappings, malformed diffs and row-limit overflow never show up
/// here; they are absorbed where they occur.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("classification recursion")]
    ClassificationRecursion,

    #[error("deferred work did not settle after {batches} batches")]
    CascadeLimit { batches: usize },

    #[error("unknown group: {group}")]
    UnknownGroup { group: String },

    #[error("unknown step: {step}")]
    UnknownStep { step: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    #[must_use]
    pub fn unknown_group(group: impl Into<String>) -> Self {
        Self::UnknownGroup {
            group: group.into(),
        }
    }

    #[must_use]
    pub fn unknown_step(step: impl Into<String>) -> Self {
        Self::UnknownStep { step: step.into() }
    }
}

/// Errors loading or validating a [`FormSchema`](crate::config::FormSchema).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineError};

    #[test]
    fn recursion_message_is_stable() {
        assert_eq!(
            EngineError::ClassificationRecursion.to_string(),
            "classification recursion"
        );
    }

    #[test]
    fn validation_errors_are_joined() {
        let error = ConfigError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(error.to_string(), "validation errors: a; b");
    }

    #[test]
    fn config_errors_convert_into_engine_errors() {
        let error: EngineError = ConfigError::Validation(vec!["x".into()]).into();
        assert!(matches!(error, EngineError::Config(_)));
        assert_eq!(
            EngineError::unknown_group("drivers").to_string(),
            "unknown group: drivers"
        );
    }
}
