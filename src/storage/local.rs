use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::BlobInfo;
use crate::storage::BlobStore;

/// File system blob store: one file per blob, named by its id
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve an id to its file, refusing anything that is not a plain uuid
    fn get_full_path(&self, id: &str) -> Result<PathBuf> {
        Uuid::parse_str(id).map_err(|_| AppError::BlobNotFound(id.to_string()))?;
        Ok(self.base_path.join(id))
    }
}

fn io_unavailable(e: std::io::Error) -> AppError {
    AppError::StoreUnavailable(format!("blob directory: {}", e))
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(&self, data: Bytes) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let full_path = self.get_full_path(&id)?;

        fs::create_dir_all(&self.base_path).await.map_err(io_unavailable)?;

        // Write under a temporary name so enumeration never sees a partial blob
        let tmp_path = self.base_path.join(format!(".{}.part", id));
        let mut file = fs::File::create(&tmp_path).await.map_err(io_unavailable)?;
        file.write_all(&data).await.map_err(io_unavailable)?;
        file.flush().await.map_err(io_unavailable)?;
        drop(file);
        fs::rename(&tmp_path, &full_path).await.map_err(io_unavailable)?;

        tracing::debug!("Saved blob to {:?}", full_path);
        Ok(id)
    }

    async fn fetch(&self, id: &str) -> Result<Bytes> {
        let full_path = self.get_full_path(id)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::BlobNotFound(id.to_string())
            } else {
                io_unavailable(e)
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn delete(&self, id: &str) -> Result<i64> {
        let full_path = self.get_full_path(id)?;

        let not_found_or = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::BlobNotFound(id.to_string())
            } else {
                AppError::BlobDeleteFailed {
                    blob_id: id.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let length = fs::metadata(&full_path).await.map_err(not_found_or)?.len() as i64;
        fs::remove_file(&full_path).await.map_err(not_found_or)?;
        tracing::debug!("Deleted blob {:?}", full_path);

        Ok(length)
    }

    async fn list_all(&self) -> Result<Vec<BlobInfo>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_unavailable(e)),
        };

        let mut blobs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_unavailable)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if Uuid::parse_str(&name).is_err() {
                continue;
            }
            // A blob removed between read_dir and metadata is simply skipped
            match entry.metadata().await {
                Ok(meta) if meta.is_file() => blobs.push(BlobInfo {
                    id: name,
                    length: meta.len() as i64,
                }),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_unavailable(e)),
            }
        }

        Ok(blobs)
    }

    fn store_type(&self) -> &'static str {
        "local"
    }
}
