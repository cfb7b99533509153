use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::models::BlobInfo;

/// Blob store adapter.
///
/// Blobs are opaque byte payloads addressed by an id the store assigns.
/// Individual operations are independently safe to interleave; nothing here
/// holds a store-wide lock.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist bytes and return the new blob id
    async fn store(&self, data: Bytes) -> Result<String>;

    /// Read a blob. Missing ids yield `AppError::BlobNotFound`.
    async fn fetch(&self, id: &str) -> Result<Bytes>;

    /// Remove a blob and return how many bytes it held.
    /// Missing ids yield `AppError::BlobNotFound`.
    async fn delete(&self, id: &str) -> Result<i64>;

    /// Enumerate every blob with its length
    async fn list_all(&self) -> Result<Vec<BlobInfo>>;

    /// Get the storage type name
    fn store_type(&self) -> &'static str;
}
