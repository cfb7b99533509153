use crate::models::{AdmissionDecision, AdmissionReason};
use crate::services::UsageAccountant;

/// Decides whether an upload of a given size may proceed
#[derive(Clone)]
pub struct AdmissionController {
    accountant: UsageAccountant,
}

impl AdmissionController {
    pub fn new(accountant: UsageAccountant) -> Self {
        Self { accountant }
    }

    /// Check a prospective upload against current usage.
    ///
    /// Advisory only: nothing is reserved, so two concurrent uploads can both
    /// pass when only one fits. If usage cannot be computed the check fails
    /// open and the upload is allowed.
    pub async fn check_admission(&self, candidate_bytes: i64) -> AdmissionDecision {
        let limits = self.accountant.limits();

        let snapshot = match self.accountant.compute_usage().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Usage check failed, admitting upload anyway: {}", e);
                return AdmissionDecision {
                    allow: true,
                    should_cleanup: false,
                    reason: None,
                    message: None,
                    snapshot: None,
                    error: Some(e.to_string()),
                };
            }
        };

        // Critical usage wins over the projected-size check, so even a tiny
        // upload is refused once the store is critical.
        if snapshot.usage_fraction >= limits.critical_fraction {
            let message = format!(
                "Storage is {:.1}% full; delete files or contact an administrator",
                snapshot.usage_percent
            );
            tracing::warn!(candidate_bytes, "Upload denied: {}", message);
            return AdmissionDecision {
                allow: false,
                should_cleanup: true,
                reason: Some(AdmissionReason::QuotaCritical),
                message: Some(message),
                snapshot: Some(snapshot),
                error: None,
            };
        }

        let should_cleanup = snapshot.usage_fraction >= limits.cleanup_fraction;
        let projected = (snapshot.total_bytes + candidate_bytes) as f64 / limits.max_bytes as f64;
        if projected > 1.0 {
            let message = format!(
                "Upload of {} bytes exceeds the {} bytes still available",
                candidate_bytes,
                snapshot.available_bytes()
            );
            tracing::warn!("Upload denied: {}", message);
            return AdmissionDecision {
                allow: false,
                should_cleanup,
                reason: Some(AdmissionReason::InsufficientCapacity),
                message: Some(message),
                snapshot: Some(snapshot),
                error: None,
            };
        }

        AdmissionDecision {
            allow: true,
            should_cleanup,
            reason: None,
            message: None,
            snapshot: Some(snapshot),
            error: None,
        }
    }
}
