use thiserror::Error;

use crate::engine::{EngineKind, InferenceMode};

#[derive(Error, Debug)]
pub enum SieveError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine {engine} is not supported by task {task}")]
    UnsupportedEngine { task: String, engine: EngineKind },

    #[error("Inference mode {mode} is not supported by engine {engine}")]
    UnsupportedMode { engine: EngineKind, mode: InferenceMode },

    #[error("Engine {engine} does not support few-shot examples (task {task})")]
    FewshotNotSupported { task: String, engine: EngineKind },

    #[error("Invalid few-shot example: {0}")]
    InvalidFewshot(String),

    #[error("Invalid prompt signature: {0}")]
    InvalidSignature(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate task id in pipeline: {0}")]
    DuplicateTaskId(String),

    #[error("Backend contract violation: {0}")]
    ContractViolation(String),

    #[error("Backend error ({backend}): {message}")]
    Backend { backend: String, message: String },

    #[error("Document {index} has neither chunks nor text")]
    MissingText { index: usize },

    #[error("Not all documents have results for task {task_id}")]
    MissingResult { task_id: String },
}

impl SieveError {
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Configuration errors are raised while a task or pipeline is being set up and never
    /// mid-run.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedEngine { .. }
                | Self::UnsupportedMode { .. }
                | Self::FewshotNotSupported { .. }
                | Self::InvalidFewshot(_)
                | Self::InvalidSignature(_)
                | Self::Template(_)
                | Self::Config(_)
                | Self::DuplicateTaskId(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SieveError>;
