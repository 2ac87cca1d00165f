//! Startup recovery of a persisted job session.
//!
//! Call [`rehydrate`] once when the client starts. It rebuilds the
//! [`JobStateMachine`] from whatever the [`SessionStore`] holds, so a job
//! submitted before a restart is still tracked (or its outcome still
//! shown) afterwards.

use std::sync::Arc;

use crate::api::SimulationBackend;
use crate::error::TrackerResult;
use crate::machine::JobStateMachine;
use crate::poller::PollConfig;
use crate::store::SessionStore;

/// Build a tracker whose state mirrors the persisted session.
///
/// | stored status | resulting state                                   |
/// |---------------|---------------------------------------------------|
/// | absent        | `Idle`                                            |
/// | `processing`  | `Processing`, with a fresh poller for the same job |
/// | `complete`    | `Complete`, without contacting the server          |
/// | `error`       | `Error`, with a generic retry-eligible message     |
///
/// Must be called inside a tokio runtime when a processing session may
/// be present.
pub fn rehydrate(
    store: Box<dyn SessionStore>,
    backend: Arc<dyn SimulationBackend>,
    config: PollConfig,
) -> TrackerResult<JobStateMachine> {
    let persisted = store.read()?;
    let mut machine = JobStateMachine::new(store, backend, config);

    match persisted {
        Some(session) => machine.restore(session),
        None => tracing::debug!("No persisted simulation session"),
    }
    Ok(machine)
}
