use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{validate_artifact_path, ArtifactStore, StoredArtifact};
use crate::error::StorageError;

const FILE_SCHEME: &str = "file://";

/// Stores artifacts as files below a root directory and hands out
/// `file://` URLs.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(path: &Path) -> String {
        format!("{}{}", FILE_SCHEME, path.display())
    }

    /// Maps a URL back to a file, refusing anything outside the root.
    fn path_for_url(&self, url: &str) -> Result<PathBuf, StorageError> {
        let raw = url
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| StorageError::UnsupportedUrl(url.to_string()))?;
        let path = PathBuf::from(raw);
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::UnsupportedUrl(url.to_string()))?;
        validate_artifact_path(&relative.to_string_lossy())?;
        Ok(path)
    }

    async fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredArtifact, StorageError> {
        validate_artifact_path(path)?;

        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            self.ensure_directory(parent).await?;
        }

        // Write beside the target then rename, so readers never see a
        // partially written artifact.
        let staging = target.with_file_name(format!(
            ".{}.{}.partial",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            uuid::Uuid::new_v4().simple()
        ));
        let size = bytes.len() as u64;
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: staging.clone(),
                source: e,
            })?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StorageError::WriteFile {
                path: target,
                source: e,
            });
        }

        log::debug!("Stored artifact {} ({} bytes)", path, size);

        Ok(StoredArtifact {
            url: Self::url_for(&target),
            pathname: path.to_string(),
            size,
            content_type: content_type.to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for_url(url)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(url.to_string()))
            }
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }
}
