use qsim_core::error::CoreError;
use qsim_core::types::DbId;

use crate::api::ApiError;
use crate::store::StoreError;

/// Errors surfaced by the tracker to its caller.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A domain-level error from `qsim_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The session store could not be read or written.
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// A call to the simulation server failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The submission gate is closed.
    #[error("A simulation is already running (job {job_id}). Wait for it to finish before starting another.")]
    JobActive { job_id: DbId },
}

impl TrackerError {
    /// Whether this is a validation error: a rejected or invalid request
    /// that is shown inline and changes no tracker state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TrackerError::Core(CoreError::Validation(_))
                | TrackerError::Api(ApiError::Rejected { .. })
        )
    }
}

/// Convenience alias for tracker results.
pub type TrackerResult<T> = Result<T, TrackerError>;
