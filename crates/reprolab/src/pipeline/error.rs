use thiserror::Error;

use crate::error::{ModelError, SandboxError, StorageError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),

    #[error("Document unavailable: {0}")]
    MissingDocument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Record '{0}' disappeared while running")]
    RecordVanished(String),
}

impl PipelineError {
    /// Error code stored on the failed record. `default` is the pipeline's
    /// catch-all code.
    pub fn code(&self, default: &'static str) -> &'static str {
        match self {
            PipelineError::MissingDocument(_) => super::MISSING_BLOB,
            _ => default,
        }
    }
}

/// Problems a run recovers from; logged and reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    TitleExtractionFailed { error: String },
    ModelFileUnavailable { error: String },
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineWarning::TitleExtractionFailed { error } => {
                write!(f, "title extraction failed: {}", error)
            }
            PipelineWarning::ModelFileUnavailable { error } => {
                write!(f, "document not attached to prompt: {}", error)
            }
        }
    }
}
