use serde::Serialize;

use crate::config::StorageLimits;
use crate::error::{AppError, Result};

/// Usage level relative to the configured thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Normal,
    Warning,
    High,
    Critical,
}

impl UsageStatus {
    /// Classify a usage fraction, checking the highest threshold first
    pub fn classify(fraction: f64, limits: &StorageLimits) -> Self {
        if fraction >= limits.critical_fraction {
            UsageStatus::Critical
        } else if fraction >= limits.cleanup_fraction {
            UsageStatus::High
        } else if fraction >= limits.warning_fraction {
            UsageStatus::Warning
        } else {
            UsageStatus::Normal
        }
    }
}

/// Point-in-time view of the blob store. Never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub total_bytes: i64,
    pub file_count: i64,
    pub max_bytes: i64,
    pub usage_fraction: f64,
    pub usage_percent: f64,
    pub status: UsageStatus,
}

impl UsageSnapshot {
    pub fn new(total_bytes: i64, file_count: i64, limits: &StorageLimits) -> Self {
        let usage_fraction = total_bytes as f64 / limits.max_bytes as f64;
        Self {
            total_bytes,
            file_count,
            max_bytes: limits.max_bytes,
            usage_fraction,
            usage_percent: (usage_fraction * 10_000.0).round() / 100.0,
            status: UsageStatus::classify(usage_fraction, limits),
        }
    }

    pub fn available_bytes(&self) -> i64 {
        (self.max_bytes - self.total_bytes).max(0)
    }
}

/// Why an upload was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    QuotaCritical,
    InsufficientCapacity,
}

/// Outcome of an admission check
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionDecision {
    pub allow: bool,
    pub should_cleanup: bool,
    pub reason: Option<AdmissionReason>,
    pub message: Option<String>,
    pub snapshot: Option<UsageSnapshot>,
    /// Set when usage could not be computed and the check failed open
    pub error: Option<String>,
}

impl AdmissionDecision {
    /// Turn a denial into the matching error
    pub fn into_result(self) -> Result<Self> {
        let message = self.message.clone().unwrap_or_default();
        match (self.allow, self.reason) {
            (false, Some(AdmissionReason::QuotaCritical)) => Err(AppError::QuotaCritical(message)),
            (false, Some(AdmissionReason::InsufficientCapacity)) => {
                Err(AppError::InsufficientCapacity(message))
            }
            (false, None) => Err(AppError::Internal(
                "Admission denied without a reason".to_string(),
            )),
            (true, _) => Ok(self),
        }
    }
}
