//! Artifact storage for uploaded documents, submission archives and results.
//!
//! Writes return a URL; reads go back through that URL only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub mod blob;
pub mod filesystem;
pub mod memory;

pub use blob::HttpBlobStore;
pub use filesystem::FsArtifactStore;
pub use memory::MemoryArtifactStore;

/// Location of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    /// URL the artifact can be fetched from.
    pub url: String,
    /// Store-relative path.
    pub pathname: String,
    pub size: u64,
    pub content_type: String,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes `bytes` at `path`, replacing anything already there.
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredArtifact, StorageError>;

    /// Reads an artifact back by the URL `put` returned.
    ///
    /// Returns [`StorageError::NotFound`] when nothing exists at the URL.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

/// Rejects empty, absolute and parent-relative artifact paths.
pub fn validate_artifact_path(path: &str) -> Result<(), StorageError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// `papers/<job_id>/<filename>`
pub fn paper_path(job_id: &str, filename: &str) -> String {
    format!("papers/{}/{}", job_id, filename)
}

/// `results/<job_id>/scaffold.json`
pub fn scaffold_result_path(job_id: &str) -> String {
    format!("results/{}/scaffold.json", job_id)
}

/// `submissions/<submission_id>/<filename>`
pub fn submission_path(submission_id: &str, filename: &str) -> String {
    format!("submissions/{}/{}", submission_id, filename)
}

/// `submissions/<submission_id>/result.json`
pub fn submission_result_path(submission_id: &str) -> String {
    format!("submissions/{}/result.json", submission_id)
}
