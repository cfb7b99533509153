use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::{now_timestamp, Database};
use crate::error::{AppError, Result};
use crate::models::BlobInfo;
use crate::storage::BlobStore;

/// Blob store keeping bytes in the application database
pub struct DatabaseBlobStore {
    db: Database,
}

impl DatabaseBlobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn unavailable(e: sqlx::Error) -> AppError {
    AppError::StoreUnavailable(format!("blob table: {}", e))
}

#[async_trait]
impl BlobStore for DatabaseBlobStore {
    async fn store(&self, data: Bytes) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let digest = format!("{:x}", Sha256::digest(&data));

        sqlx::query(
            r#"
            INSERT INTO blobs (id, data, length, sha256, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(data.as_ref())
        .bind(data.len() as i64)
        .bind(&digest)
        .bind(now_timestamp())
        .execute(self.db.pool())
        .await
        .map_err(unavailable)?;

        tracing::debug!("Stored blob {} ({} bytes)", id, data.len());
        Ok(id)
    }

    async fn fetch(&self, id: &str) -> Result<Bytes> {
        let data: Option<Vec<u8>> = sqlx::query_scalar("SELECT data FROM blobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(unavailable)?;

        data.map(Bytes::from)
            .ok_or_else(|| AppError::BlobNotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<i64> {
        let length: Option<i64> =
            sqlx::query_scalar("DELETE FROM blobs WHERE id = ? RETURNING length")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await
                .map_err(unavailable)?;

        match length {
            Some(length) => {
                tracing::debug!("Deleted blob {} ({} bytes)", id, length);
                Ok(length)
            }
            None => Err(AppError::BlobNotFound(id.to_string())),
        }
    }

    async fn list_all(&self) -> Result<Vec<BlobInfo>> {
        sqlx::query_as("SELECT id, length FROM blobs")
            .fetch_all(self.db.pool())
            .await
            .map_err(unavailable)
    }

    fn store_type(&self) -> &'static str {
        "database"
    }
}
