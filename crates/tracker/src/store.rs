//! Durable storage for the single job session.
//!
//! The store is the source of truth for "is a job active". It holds at
//! most one [`JobSession`] under a fixed key; absence means there is no
//! pending or unacknowledged job.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use qsim_core::job::{JobSession, JobStatus};

/// Fixed key the session record is stored under.
pub const SESSION_KEY: &str = "simulation_progress";

/// Errors raised by a [`SessionStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Synchronous, local key/value storage for one [`JobSession`].
///
/// Implementors provide the raw [`read`](Self::read),
/// [`replace`](Self::replace) and [`clear`](Self::clear) primitives; the
/// provided methods layer the session invariants on top.
pub trait SessionStore: Send + Sync {
    /// The stored session, if any.
    fn read(&self) -> Result<Option<JobSession>, StoreError>;

    /// Overwrite the record unconditionally.
    fn replace(&self, session: &JobSession) -> Result<(), StoreError>;

    /// Remove the record. Removing an absent record is not an error.
    fn clear(&self) -> Result<(), StoreError>;

    /// Persist `session`.
    ///
    /// Refuses to overwrite a different job that is still processing, and
    /// refuses to move the stored job to a status it cannot reach (a
    /// finished job never goes back to processing). Clear the record first
    /// to start over.
    fn write(&self, session: &JobSession) -> Result<(), StoreError> {
        if let Some(existing) = self.read()? {
            if existing.job_id != session.job_id && existing.is_active() {
                return Err(StoreError::Conflict(format!(
                    "job {} is still processing",
                    existing.job_id
                )));
            }
            if existing.job_id == session.job_id
                && !existing.status.can_transition_to(session.status)
            {
                return Err(StoreError::Conflict(format!(
                    "job {} is already {}",
                    existing.job_id, existing.status
                )));
            }
        }
        self.replace(session)
    }

    /// Update the stored status. No-op when no session exists.
    ///
    /// Transitions that would break monotonic status (a terminal state
    /// moving anywhere else) are ignored.
    fn mark_status(&self, status: JobStatus) -> Result<(), StoreError> {
        let Some(mut session) = self.read()? else {
            return Ok(());
        };
        match session.transition(status) {
            Ok(true) => self.replace(&session),
            Ok(false) => Ok(()),
            Err(e) => {
                tracing::warn!(job_id = session.job_id, error = %e, "Ignoring status change");
                Ok(())
            }
        }
    }
}

/// Process-local store. Clones share the same record, which lets tests
/// model a reload by handing the same store to a fresh tracker.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<Option<JobSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<JobSession>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionStore for MemorySessionStore {
    fn read(&self) -> Result<Option<JobSession>, StoreError> {
        Ok(self.slot().clone())
    }

    fn replace(&self, session: &JobSession) -> Result<(), StoreError> {
        *self.slot() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }
}

/// Store backed by `<dir>/simulation_progress.json`.
///
/// Writes go to a sibling temp file that is renamed into place, so a
/// crash mid-write leaves either the old record or the new one.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{SESSION_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn read(&self) -> Result<Option<JobSession>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn replace(&self, session: &JobSession) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
