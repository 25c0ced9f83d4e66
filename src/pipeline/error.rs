//! Pipeline, step and registry error types

use crate::core::error_handling::ContextualError;
use crate::queue::api::{QueueError, StoreError};
use std::time::Duration;

/// Category of a per-item failure, recorded in the error envelope
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    strum_macros::Display,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Processing,
    MissingField,
    Rollback,
}

/// Failure raised while a step handles one item
///
/// Contained by the step worker: it never ends the worker task, it is
/// turned into an error envelope and a rollback attempt instead.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("payload key '{key}' is missing at {location} (available keys: {available:?})")]
    MissingField {
        key: String,
        location: String,
        available: Vec<String>,
    },

    #[error("{message}")]
    Failed { message: String },

    #[error("step panicked: {message}")]
    Panicked { message: String },

    #[error("queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("payload conversion failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProcessingError {
    /// Shorthand for an arbitrary processing failure
    pub fn failed(message: impl Into<String>) -> Self {
        ProcessingError::Failed {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ProcessingError::MissingField { .. } => FailureKind::MissingField,
            _ => FailureKind::Processing,
        }
    }

    /// The error and its source chain, one cause per line
    pub fn traceback(&self) -> String {
        let mut text = format!("{}: {}", self.variant_name(), self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            text.push_str(&format!("\ncaused by: {}", cause));
            source = cause.source();
        }
        text
    }

    fn variant_name(&self) -> &'static str {
        match self {
            ProcessingError::MissingField { .. } => "MissingField",
            ProcessingError::Failed { .. } => "Failed",
            ProcessingError::Panicked { .. } => "Panicked",
            ProcessingError::Queue(_) => "Queue",
            ProcessingError::Serialization(_) => "Serialization",
        }
    }
}

/// Errors of the pipeline lifecycle
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline '{name}' did not report running workers within {waited:?}")]
    NotRunning { name: String, waited: Duration },

    #[error("worker for step {step} ended abnormally: {message}")]
    WorkerLost { step: String, message: String },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ContextualError for PipelineError {
    fn is_user_actionable(&self) -> bool {
        false
    }

    fn user_message(&self) -> Option<String> {
        None
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors of pipeline registration and lookup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a pipeline definition must have a non-empty name")]
    MissingName,

    #[error("pipeline '{name}' is already registered")]
    Duplicate { name: String },

    #[error("pipeline '{name}' is not registered")]
    NotFound { name: String },
}

impl ContextualError for RegistryError {
    fn is_user_actionable(&self) -> bool {
        true
    }

    fn user_message(&self) -> Option<String> {
        Some(self.to_string())
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_kind_and_message() {
        let err = ProcessingError::MissingField {
            key: "user_id".to_string(),
            location: "src/steps.rs:10:5".to_string(),
            available: vec!["name".to_string()],
        };
        assert_eq!(err.kind(), FailureKind::MissingField);
        assert_eq!(err.kind().to_string(), "missing_field");
        assert!(err.to_string().contains("'user_id'"));
        assert!(err.to_string().contains("src/steps.rs:10:5"));
    }

    #[test]
    fn test_traceback_includes_source_chain() {
        let err = ProcessingError::Queue(QueueError::Store(StoreError::Io {
            message: "disk full".to_string(),
        }));
        let traceback = err.traceback();
        assert!(traceback.starts_with("Queue: "));
        assert!(traceback.contains("disk full"));
        assert_eq!(err.kind(), FailureKind::Processing);
    }

    #[test]
    fn test_failed_traceback_carries_message() {
        let err = ProcessingError::failed("BOOM");
        assert_eq!(err.traceback(), "Failed: BOOM");
    }

    #[test]
    fn test_registry_errors_are_user_actionable() {
        let err = RegistryError::NotFound {
            name: "nightly".to_string(),
        };
        assert!(err.is_user_actionable());
        assert_eq!(
            err.user_message().as_deref(),
            Some("pipeline 'nightly' is not registered")
        );
        assert!(!PipelineError::NotRunning {
            name: "x".to_string(),
            waited: Duration::from_secs(1),
        }
        .is_user_actionable());
    }
}
