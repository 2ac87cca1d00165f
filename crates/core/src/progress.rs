//! Progress snapshots returned by the progress endpoint.

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;
use crate::types::DbId;

/// Message shown when the server reports a failure without saying why.
pub const FALLBACK_ERROR_MESSAGE: &str = "Simulation failed";

/// One point-in-time read of a job's progress.
///
/// Only `status` is required on the wire; everything else defaults so a
/// sparse response still drives the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(rename = "simID", default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<DbId>,
    #[serde(default)]
    pub current: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct: Option<u32>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_symbol: Option<String>,
}

impl ProgressSnapshot {
    pub fn new(current: u32, total: u32, status: JobStatus) -> Self {
        Self {
            job_id: None,
            current,
            total,
            pct: Some(compute_percent(current, total)),
            status,
            message: None,
            state_symbol: None,
            gate_symbol: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Completion percentage, preferring the server's `pct`.
    pub fn percent(&self) -> u32 {
        self.pct
            .unwrap_or_else(|| compute_percent(self.current, self.total))
            .min(100)
    }

    /// The server's error text, or [`FALLBACK_ERROR_MESSAGE`] when it is
    /// missing or blank.
    pub fn error_message(&self) -> String {
        match self.message.as_deref() {
            Some(m) if !m.trim().is_empty() => m.to_string(),
            _ => FALLBACK_ERROR_MESSAGE.to_string(),
        }
    }
}

/// `floor(current / total * 100)` capped at 100, or 0 when `total` is 0.
pub fn compute_percent(current: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    ((u64::from(current) * 100) / u64::from(total)).min(100) as u32
}
