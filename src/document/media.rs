use crate::utils::error::ApiError;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Persists raw media bytes under the configured media directory and hands
/// back the public `/media/<file>` URL for them.
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn store(&self, bytes: &[u8], original_name: &str) -> Result<String, ApiError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ApiError::StorageError(format!("media dir: {}", e)))?;

        let extension = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let filename = format!("{}.{}", uuid::Uuid::new_v4(), extension);
        let target = self.root.join(&filename);

        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| ApiError::StorageError(format!("write media: {}", e)))?;

        info!(path = %target.display(), bytes = bytes.len(), "stored media blob");
        Ok(format!("/media/{}", filename))
    }

    /// Remove the blob behind a `/media/<file>` URL. Missing files are not
    /// an error; the document row is the source of truth.
    pub async fn remove(&self, media_url: &str) {
        let Some(filename) = media_url.strip_prefix("/media/") else {
            return;
        };
        // Guard against path traversal through stored URLs.
        if filename.contains('/') || filename.contains("..") {
            warn!(media_url, "refusing suspicious media url");
            return;
        }
        let target = self.root.join(filename);
        if let Err(e) = tokio::fs::remove_file(&target).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %target.display(), error = %e, "failed to remove media blob");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path());

        let url = storage.store(b"pixels", "photo.png").await.unwrap();
        assert!(url.starts_with("/media/"));
        assert!(url.ends_with(".png"));

        let on_disk = dir.path().join(url.strip_prefix("/media/").unwrap());
        assert_eq!(tokio::fs::read(&on_disk).await.unwrap(), b"pixels");

        storage.remove(&url).await;
        assert!(!on_disk.exists());
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path());
        storage.remove("/media/never-existed.mp4").await;
    }

    #[tokio::test]
    async fn test_remove_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(dir.path());
        storage.remove("/media/../etc/passwd").await;
    }
}
