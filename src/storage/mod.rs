pub mod database;
pub mod local;
pub mod provider;

pub use database::*;
pub use local::*;
pub use provider::*;

use std::sync::Arc;

use crate::config::{BlobBackend, StorageConfig};
use crate::db::Database;

/// Build the blob store selected in configuration
pub fn open_blob_store(config: &StorageConfig, db: &Database) -> Arc<dyn BlobStore> {
    let store: Arc<dyn BlobStore> = match config.backend {
        BlobBackend::Database => Arc::new(DatabaseBlobStore::new(db.clone())),
        BlobBackend::Local => Arc::new(LocalBlobStore::new(&config.local_path)),
    };
    tracing::info!("Using {} blob store", store.store_type());
    store
}
