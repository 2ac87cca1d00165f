//! Guard against starting a second simulation while one is running.

use qsim_core::job::JobSession;

use crate::error::TrackerError;
use crate::store::{SessionStore, StoreError};

/// Read-only view of the session store that answers "may a new job start?".
pub struct SubmissionGate<'a> {
    store: &'a dyn SessionStore,
}

impl<'a> SubmissionGate<'a> {
    pub fn new(store: &'a dyn SessionStore) -> Self {
        Self { store }
    }

    /// `true` iff no session exists or the stored one is not processing.
    pub fn can_submit(&self) -> Result<bool, StoreError> {
        Ok(self.store.read()?.map_or(true, |s| !s.is_active()))
    }

    /// Reject with [`TrackerError::JobActive`] while a job is processing.
    ///
    /// On success returns the finished-but-unacknowledged session, if one
    /// is still stored, so the caller can replace it.
    pub fn ensure_open(&self) -> Result<Option<JobSession>, TrackerError> {
        match self.store.read()? {
            Some(session) if session.is_active() => {
                tracing::info!(job_id = session.job_id, "Submission rejected, job still processing");
                Err(TrackerError::JobActive {
                    job_id: session.job_id,
                })
            }
            leftover => Ok(leftover),
        }
    }
}
