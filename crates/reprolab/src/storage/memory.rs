use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{validate_artifact_path, ArtifactStore, StoredArtifact};
use crate::error::StorageError;

const MEMORY_SCHEME: &str = "memory://";

/// Process-local artifact store for tests and local development.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url_for(path: &str) -> String {
        format!("{}{}", MEMORY_SCHEME, path)
    }

    /// Returns the bytes and content type stored at `path`.
    pub fn get(&self, path: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path)
            .cloned()
    }

    /// Deletes an artifact, returning whether it existed.
    pub fn remove(&self, path: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(path)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredArtifact, StorageError> {
        validate_artifact_path(path)?;
        let size = bytes.len() as u64;
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(StoredArtifact {
            url: Self::url_for(path),
            pathname: path.to_string(),
            size,
            content_type: content_type.to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let path = url
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| StorageError::UnsupportedUrl(url.to_string()))?;
        self.get(path)
            .map(|(bytes, _)| bytes)
            .ok_or_else(|| StorageError::NotFound(url.to_string()))
    }
}
