use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

/// Blob storage for raw uploads and generated thumbnails.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Persist upload bytes under a fresh unique name, returning the stored path.
    async fn save_upload(&self, original_name: &str, data: &[u8]) -> Result<PathBuf, StorageError>;

    /// Resolve a stored upload to a readable local path.
    async fn read_path(&self, stored_path: &str) -> Result<PathBuf, StorageError>;

    /// Remove a stored upload. Missing files are not an error.
    async fn remove_upload(&self, stored_path: &str) -> Result<(), StorageError>;

    /// Directory thumbnails are written to and served from.
    fn thumbnail_dir(&self) -> &Path;

    /// Local path of a thumbnail reference.
    fn thumbnail_path(&self, thumbnail_ref: &str) -> PathBuf {
        self.thumbnail_dir().join(thumbnail_ref)
    }

    /// Delete a thumbnail. Missing files are not an error.
    async fn remove_thumbnail(&self, thumbnail_ref: &str) -> Result<(), StorageError>;

    async fn health_check(&self) -> Result<(), StorageError>;
}

/// Local-directory storage.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    upload_dir: PathBuf,
    thumbnail_dir: PathBuf,
}

impl LocalStorage {
    /// Create the storage, making sure both directories exist.
    pub async fn new(
        upload_dir: impl Into<PathBuf>,
        thumbnail_dir: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let upload_dir = upload_dir.into();
        let thumbnail_dir = thumbnail_dir.into();
        tokio::fs::create_dir_all(&upload_dir).await?;
        tokio::fs::create_dir_all(&thumbnail_dir).await?;
        Ok(Self {
            upload_dir,
            thumbnail_dir,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// `<uuid><original extension>`, so the original name never touches the disk.
    fn stored_name(original_name: &str) -> String {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        format!("{}{}", Uuid::new_v4(), ext)
    }
}

#[async_trait]
impl MediaStorage for LocalStorage {
    async fn save_upload(&self, original_name: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.upload_dir.join(Self::stored_name(original_name));
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    async fn read_path(&self, stored_path: &str) -> Result<PathBuf, StorageError> {
        let path = PathBuf::from(stored_path);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(StorageError::NotFound(stored_path.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(stored_path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn remove_upload(&self, stored_path: &str) -> Result<(), StorageError> {
        remove_if_present(Path::new(stored_path)).await
    }

    fn thumbnail_dir(&self) -> &Path {
        &self.thumbnail_dir
    }

    async fn remove_thumbnail(&self, thumbnail_ref: &str) -> Result<(), StorageError> {
        remove_if_present(&self.thumbnail_path(thumbnail_ref)).await
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        for dir in [&self.upload_dir, &self.thumbnail_dir] {
            if !tokio::fs::metadata(dir).await?.is_dir() {
                return Err(StorageError::NotFound(dir.display().to_string()));
            }
        }
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Io(e)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Stored file not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
