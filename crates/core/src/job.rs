//! The persisted job session and its lifecycle status.
//!
//! A [`JobSession`] is the only record the tracker keeps locally. It is
//! written when the server accepts a simulation, updated as poll results
//! arrive, and removed when the user acknowledges the outcome.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Lifecycle phase of a simulation job.
///
/// Serialized in lowercase to match the progress endpoint's `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    /// `true` for `Complete` and `Error`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }

    /// Whether a session in `self` may move to `next`.
    ///
    /// Re-applying the current status is allowed so that duplicate
    /// deliveries stay harmless.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        self == next
            || matches!(
                (self, next),
                (JobStatus::Processing, JobStatus::Complete) | (JobStatus::Processing, JobStatus::Error)
            )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable context kept only for redisplay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLabels {
    #[serde(default)]
    pub state_symbol: String,
    #[serde(default)]
    pub gate_symbol: String,
}

impl JobLabels {
    pub fn new(state_symbol: impl Into<String>, gate_symbol: impl Into<String>) -> Self {
        Self {
            state_symbol: state_symbol.into(),
            gate_symbol: gate_symbol.into(),
        }
    }

    /// In-progress caption, e.g. `Applying |X| to |0>`.
    pub fn progress_message(&self) -> String {
        if self.state_symbol.is_empty() || self.gate_symbol.is_empty() {
            return "Running simulation".to_string();
        }
        format!("Applying {} to {}", self.gate_symbol, self.state_symbol)
    }
}

/// The locally persisted description of the most recent job.
///
/// JSON shape: `{jobID, total, stateSymbol, gateSymbol, status, startedAt}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSession {
    #[serde(rename = "jobID")]
    pub job_id: DbId,
    pub total: u32,
    #[serde(flatten)]
    pub labels: JobLabels,
    pub status: JobStatus,
    pub started_at: Timestamp,
}

impl JobSession {
    /// A freshly accepted job, in `processing`.
    pub fn new(job_id: DbId, total: u32, labels: JobLabels) -> Self {
        Self {
            job_id,
            total,
            labels,
            status: JobStatus::Processing,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Processing
    }

    /// Move the session to `next`, enforcing monotonic status.
    ///
    /// Returns `Ok(true)` when the status changed and `Ok(false)` when it
    /// was already `next`.
    pub fn transition(&mut self, next: JobStatus) -> Result<bool, CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "job {} cannot move from {} to {}",
                self.job_id, self.status, next
            )));
        }
        let changed = self.status != next;
        self.status = next;
        Ok(changed)
    }
}
