pub mod admission;
pub mod auth;
pub mod file;
pub mod orphan;
pub mod reclaim;
pub mod record;
pub mod report;
pub mod usage;

pub use admission::AdmissionController;
pub use auth::AuthService;
pub use file::{Download, FileService};
pub use orphan::OrphanScanner;
pub use reclaim::ReclamationEngine;
pub use record::RecordStore;
pub use report::{Reporter, DEFAULT_TOP_OWNERS};
pub use usage::UsageAccountant;

use std::sync::Arc;

use crate::config::StorageLimits;
use crate::db::Database;
use crate::storage::BlobStore;

/// Every storage component wired to one blob store and one set of limits
#[derive(Clone)]
pub struct Services {
    pub accountant: UsageAccountant,
    pub reclamation: Arc<ReclamationEngine>,
    pub orphans: OrphanScanner,
    pub reporter: Reporter,
    pub files: FileService,
}

impl Services {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, limits: StorageLimits) -> Self {
        let records = RecordStore::new(db);
        let accountant = UsageAccountant::new(blobs.clone(), limits.clone());
        let admission = AdmissionController::new(accountant.clone());
        let reclamation = Arc::new(ReclamationEngine::new(
            records.clone(),
            blobs.clone(),
            accountant.clone(),
            limits,
        ));
        let orphans = OrphanScanner::new(records.clone(), blobs.clone());
        let reporter = Reporter::new(records.clone(), accountant.clone());
        let files = FileService::new(
            records,
            blobs,
            admission,
            reclamation.clone(),
        );

        Self {
            accountant,
            reclamation,
            orphans,
            reporter,
            files,
        }
    }
}
