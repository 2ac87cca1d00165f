//! Tracker events broadcast to observers.
//!
//! The state machine emits one event per transition. Renderers subscribe
//! via [`JobStateMachine::subscribe`](crate::machine::JobStateMachine::subscribe)
//! instead of inspecting the store.

use qsim_core::job::JobStatus;
use qsim_core::types::DbId;
use serde::Serialize;

use crate::machine::{Acknowledgment, FailureKind};

/// A state change in the job tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// The server accepted a job and polling started.
    JobStarted { job_id: DbId, total: u32 },

    /// A progress snapshot arrived for the running job.
    JobProgress {
        job_id: DbId,
        current: u32,
        total: u32,
        /// Completion percentage (0-100).
        percent: u32,
    },

    /// The job finished successfully.
    JobCompleted { job_id: DbId },

    /// The job failed or tracking lost contact with the server.
    JobFailed {
        job_id: DbId,
        kind: FailureKind,
        message: String,
    },

    /// A persisted session was picked up after a restart.
    JobRestored { job_id: DbId, status: JobStatus },

    /// The user cleared a terminal outcome.
    JobAcknowledged {
        job_id: DbId,
        action: Acknowledgment,
    },
}

impl TrackerEvent {
    pub fn job_id(&self) -> DbId {
        match self {
            TrackerEvent::JobStarted { job_id, .. }
            | TrackerEvent::JobProgress { job_id, .. }
            | TrackerEvent::JobCompleted { job_id }
            | TrackerEvent::JobFailed { job_id, .. }
            | TrackerEvent::JobRestored { job_id, .. }
            | TrackerEvent::JobAcknowledged { job_id, .. } => *job_id,
        }
    }
}
