//! Job lifecycle state machine.
//!
//! [`JobStateMachine`] owns the session store and the active poller. It
//! turns poller events and user acknowledgments into transitions:
//!
//! ```text
//! Idle --start_job--> Processing --completed--> Complete --view|dismiss--> Idle
//!                                \--failed----> Error ----retry|dismiss--> Idle
//! ```
//!
//! All mutation goes through `&mut self`, so store updates are serialized
//! and snapshots are applied in the order the poller produced them.
//! Events that arrive in a state with no matching transition are dropped.

use std::str::FromStr;
use std::sync::Arc;

use qsim_core::error::CoreError;
use qsim_core::job::{JobLabels, JobSession, JobStatus};
use qsim_core::progress::ProgressSnapshot;
use qsim_core::simulation::SimulationRequest;
use qsim_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::api::SimulationBackend;
use crate::error::{TrackerError, TrackerResult};
use crate::events::TrackerEvent;
use crate::gate::SubmissionGate;
use crate::poller::{PollConfig, PollEvent, ProgressPoller};
use crate::store::SessionStore;

/// Broadcast channel capacity for tracker events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shown when polling gives up after repeated transient failures.
pub const CONNECTIVITY_ERROR_MESSAGE: &str =
    "Lost connection to the server while tracking progress. Check your network connection.";

/// Shown for an error outcome recovered from the store, whose original
/// message was not persisted.
pub const RESTORED_ERROR_MESSAGE: &str =
    "The previous simulation did not finish successfully. You can retry it.";

/// Why a job ended in the `Error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The server reported that the job itself failed.
    Job,
    /// The tracker could not reach the server.
    Connectivity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn job(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Job,
            message: message.into(),
        }
    }

    pub fn connectivity() -> Self {
        Self {
            kind: FailureKind::Connectivity,
            message: CONNECTIVITY_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Current tracker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Processing {
        session: JobSession,
        /// Last progress snapshot, kept for the current render only.
        latest: Option<ProgressSnapshot>,
    },
    Complete {
        session: JobSession,
    },
    Error {
        session: JobSession,
        failure: JobFailure,
    },
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Processing { .. } => "processing",
            JobState::Complete { .. } => "complete",
            JobState::Error { .. } => "error",
        }
    }

    pub fn session(&self) -> Option<&JobSession> {
        match self {
            JobState::Idle => None,
            JobState::Processing { session, .. }
            | JobState::Complete { session }
            | JobState::Error { session, .. } => Some(session),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete { .. } | JobState::Error { .. })
    }
}

/// What the user should currently be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    InProgress {
        job_id: DbId,
        current: u32,
        total: u32,
        percent: u32,
        message: String,
    },
    Completed {
        job_id: DbId,
        total: u32,
    },
    Failed {
        job_id: DbId,
        failure: JobFailure,
    },
}

/// How the user closed a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acknowledgment {
    /// Open the results of a completed job.
    View,
    /// Go back to the creation form after a failure.
    Retry,
    /// Close the outcome without navigating.
    Dismiss,
}

impl Acknowledgment {
    pub fn as_str(self) -> &'static str {
        match self {
            Acknowledgment::View => "view",
            Acknowledgment::Retry => "retry",
            Acknowledgment::Dismiss => "dismiss",
        }
    }
}

impl std::fmt::Display for Acknowledgment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Acknowledgment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(Acknowledgment::View),
            "retry" => Ok(Acknowledgment::Retry),
            "dismiss" => Ok(Acknowledgment::Dismiss),
            other => Err(CoreError::Validation(format!(
                "Invalid acknowledgment '{other}'. Must be one of: view, retry, dismiss"
            ))),
        }
    }
}

/// Where the user goes after acknowledging an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Shots produced by the job.
    Results { job_id: DbId },
    /// The simulation creation surface.
    NewSimulation,
}

impl Navigation {
    pub fn path(&self) -> String {
        match self {
            Navigation::Results { job_id } => format!("/shots/{job_id}"),
            Navigation::NewSimulation => "/simulations".to_string(),
        }
    }
}

/// Drives one client's job from submission to acknowledgment.
pub struct JobStateMachine {
    store: Box<dyn SessionStore>,
    backend: Arc<dyn SimulationBackend>,
    config: PollConfig,
    state: JobState,
    poller: Option<ProgressPoller>,
    poll_rx: Option<mpsc::UnboundedReceiver<PollEvent>>,
    event_tx: broadcast::Sender<TrackerEvent>,
}

impl JobStateMachine {
    /// A tracker in `Idle`. Use [`rehydrate`](crate::bootstrap::rehydrate)
    /// to pick up a persisted session instead.
    pub fn new(
        store: Box<dyn SessionStore>,
        backend: Arc<dyn SimulationBackend>,
        config: PollConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            backend,
            config,
            state: JobState::Idle,
            poller: None,
            poll_rx: None,
            event_tx,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Subscribe to tracker events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_tx.subscribe()
    }

    /// Whether a poller is currently attached and running.
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_stopped())
    }

    pub fn can_submit(&self) -> TrackerResult<bool> {
        Ok(SubmissionGate::new(self.store.as_ref()).can_submit()?)
    }

    /// Gate, validate and create a simulation, then start tracking it.
    ///
    /// Rejections (gate closed, invalid request, server refusal) leave the
    /// tracker untouched. A finished but unacknowledged outcome is
    /// replaced once the server accepts the new job.
    pub async fn submit(
        &mut self,
        request: &SimulationRequest,
        labels: JobLabels,
    ) -> TrackerResult<JobSession> {
        let leftover = SubmissionGate::new(self.store.as_ref()).ensure_open()?;
        request.check()?;

        let created = self.backend.create_simulation(request).await.map_err(|e| {
            tracing::warn!(error = %e, "Simulation creation rejected");
            e
        })?;
        tracing::info!(
            job_id = created.sim_id,
            total = created.total,
            message = %created.message,
            "Simulation accepted",
        );

        if leftover.is_some() || self.state.is_terminal() {
            self.discard_outcome()?;
        }
        self.start_job(created.sim_id, created.total, labels)?;

        self.state
            .session()
            .cloned()
            .ok_or_else(|| CoreError::Internal("job did not enter processing".into()).into())
    }

    /// `Idle -> Processing`: persist the session and start polling.
    ///
    /// The store must be empty. A stored outcome is only removed by
    /// [`acknowledge`](Self::acknowledge) or by [`submit`](Self::submit)
    /// once the server accepts a replacement.
    pub fn start_job(&mut self, job_id: DbId, total: u32, labels: JobLabels) -> TrackerResult<()> {
        if !matches!(self.state, JobState::Idle) {
            return Err(CoreError::Conflict(format!(
                "cannot start job {job_id} while tracker is {}",
                self.state.name()
            ))
            .into());
        }
        match self.store.read()? {
            Some(stored) if stored.is_active() => {
                return Err(TrackerError::JobActive {
                    job_id: stored.job_id,
                });
            }
            Some(stored) => {
                return Err(CoreError::Conflict(format!(
                    "simulation {} is {} and not yet acknowledged",
                    stored.job_id, stored.status
                ))
                .into());
            }
            None => {}
        }

        let session = JobSession::new(job_id, total, labels);
        self.store.write(&session)?;
        self.attach_poller(&session);

        tracing::info!(job_id, total, "Tracking simulation");
        let _ = self.event_tx.send(TrackerEvent::JobStarted { job_id, total });
        self.state = JobState::Processing {
            session,
            latest: None,
        };
        Ok(())
    }

    /// Apply one poller event. A no-op unless the tracker is processing.
    pub fn apply(&mut self, event: PollEvent) -> TrackerResult<()> {
        if !matches!(self.state, JobState::Processing { .. }) {
            tracing::debug!(state = self.state.name(), ?event, "Ignoring poll event");
            return Ok(());
        }
        let JobState::Processing { session, latest } = &mut self.state else {
            return Ok(());
        };

        match event {
            PollEvent::Progress(snapshot) => {
                let _ = self.event_tx.send(TrackerEvent::JobProgress {
                    job_id: session.job_id,
                    current: snapshot.current,
                    total: snapshot.total,
                    percent: snapshot.percent(),
                });
                *latest = Some(snapshot);
                Ok(())
            }
            PollEvent::Completed { .. } => self.finish(None),
            PollEvent::JobFailed { message } => self.finish(Some(JobFailure::job(message))),
            PollEvent::ConnectionLost {
                failures,
                last_error,
            } => {
                tracing::warn!(failures, error = %last_error, "Giving up on progress polling");
                self.finish(Some(JobFailure::connectivity()))
            }
        }
    }

    /// Wait for the next poller event and apply it.
    ///
    /// Returns `Ok(false)` when there is no poller or it has exited.
    pub async fn next_event(&mut self) -> TrackerResult<bool> {
        let Some(rx) = self.poll_rx.as_mut() else {
            return Ok(false);
        };
        match rx.recv().await {
            Some(event) => {
                self.apply(event)?;
                Ok(true)
            }
            None => {
                self.poll_rx = None;
                Ok(false)
            }
        }
    }

    /// Drive the tracker until the job reaches a terminal state.
    pub async fn wait_for_outcome(&mut self) -> TrackerResult<Outcome> {
        while matches!(self.state, JobState::Processing { .. }) {
            if !self.next_event().await? {
                return Err(CoreError::Internal(
                    "progress polling stopped before the job finished".into(),
                )
                .into());
            }
        }
        self.outcome()
            .ok_or_else(|| CoreError::Conflict("no simulation is being tracked".into()).into())
    }

    /// Current user-facing outcome, or `None` when idle.
    pub fn outcome(&self) -> Option<Outcome> {
        match &self.state {
            JobState::Idle => None,
            JobState::Processing { session, latest } => {
                let caption = || session.labels.progress_message();
                Some(match latest {
                    Some(snap) => Outcome::InProgress {
                        job_id: session.job_id,
                        current: snap.current,
                        total: if snap.total > 0 { snap.total } else { session.total },
                        percent: snap.percent(),
                        message: snap
                            .message
                            .clone()
                            .filter(|m| !m.trim().is_empty())
                            .unwrap_or_else(caption),
                    },
                    None => Outcome::InProgress {
                        job_id: session.job_id,
                        current: 0,
                        total: session.total,
                        percent: 0,
                        message: caption(),
                    },
                })
            }
            JobState::Complete { session } => Some(Outcome::Completed {
                job_id: session.job_id,
                total: session.total,
            }),
            JobState::Error { session, failure } => Some(Outcome::Failed {
                job_id: session.job_id,
                failure: failure.clone(),
            }),
        }
    }

    /// Close a terminal outcome and return to `Idle`.
    ///
    /// Only `view` on Complete, `retry` on Error and `dismiss` on either
    /// are accepted. Acknowledging while idle is a no-op.
    pub fn acknowledge(&mut self, action: Acknowledgment) -> TrackerResult<Option<Navigation>> {
        let (job_id, navigation) = match (&self.state, action) {
            (JobState::Idle, _) => {
                tracing::debug!(%action, "Ignoring acknowledgment while idle");
                return Ok(None);
            }
            (JobState::Processing { session, .. }, _) => {
                return Err(CoreError::Conflict(format!(
                    "simulation {} is still running",
                    session.job_id
                ))
                .into());
            }
            (JobState::Complete { session }, Acknowledgment::View) => (
                session.job_id,
                Some(Navigation::Results {
                    job_id: session.job_id,
                }),
            ),
            (JobState::Error { session, .. }, Acknowledgment::Retry) => {
                (session.job_id, Some(Navigation::NewSimulation))
            }
            (
                JobState::Complete { session } | JobState::Error { session, .. },
                Acknowledgment::Dismiss,
            ) => (session.job_id, None),
            (state, action) => {
                return Err(CoreError::Conflict(format!(
                    "cannot {action} a simulation in state {}",
                    state.name()
                ))
                .into());
            }
        };

        self.store.clear()?;
        self.state = JobState::Idle;

        tracing::info!(job_id, %action, "Simulation outcome acknowledged");
        let _ = self
            .event_tx
            .send(TrackerEvent::JobAcknowledged { job_id, action });
        Ok(navigation)
    }

    /// Stop polling without changing state. Idempotent.
    pub fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        // Dropping the receiver discards anything the poller already queued.
        self.poll_rx = None;
    }

    /// Re-enter the state recorded in `session`. Used at startup only.
    pub(crate) fn restore(&mut self, session: JobSession) {
        let job_id = session.job_id;
        let status = session.status;

        let state = match status {
            JobStatus::Processing => {
                self.attach_poller(&session);
                JobState::Processing {
                    session,
                    latest: None,
                }
            }
            JobStatus::Complete => JobState::Complete { session },
            JobStatus::Error => JobState::Error {
                session,
                failure: JobFailure::job(RESTORED_ERROR_MESSAGE),
            },
        };
        self.state = state;

        tracing::info!(job_id, %status, "Restored simulation session");
        let _ = self
            .event_tx
            .send(TrackerEvent::JobRestored { job_id, status });
    }

    // ---- private helpers ----

    fn attach_poller(&mut self, session: &JobSession) {
        self.stop_polling();
        let (poller, rx) = ProgressPoller::spawn(
            Arc::clone(&self.backend),
            session.job_id,
            session.total,
            self.config,
        );
        self.poller = Some(poller);
        self.poll_rx = Some(rx);
    }

    /// `Processing -> Complete | Error`.
    fn finish(&mut self, failure: Option<JobFailure>) -> TrackerResult<()> {
        let JobState::Processing { session, .. } = &self.state else {
            return Ok(());
        };
        let mut session = session.clone();
        let status = if failure.is_some() {
            JobStatus::Error
        } else {
            JobStatus::Complete
        };

        self.stop_polling();
        let stored = self.store.mark_status(status);
        session.transition(status)?;
        let job_id = session.job_id;

        let state = match failure {
            None => {
                tracing::info!(job_id, "Simulation complete");
                let _ = self.event_tx.send(TrackerEvent::JobCompleted { job_id });
                JobState::Complete { session }
            }
            Some(failure) => {
                tracing::warn!(
                    job_id,
                    kind = ?failure.kind,
                    message = %failure.message,
                    "Simulation failed",
                );
                let _ = self.event_tx.send(TrackerEvent::JobFailed {
                    job_id,
                    kind: failure.kind,
                    message: failure.message.clone(),
                });
                JobState::Error { session, failure }
            }
        };
        self.state = state;

        stored.map_err(TrackerError::from)
    }

    /// Drop a terminal outcome ahead of a new submission.
    fn discard_outcome(&mut self) -> TrackerResult<()> {
        if let Some(session) = self.state.session() {
            tracing::info!(job_id = session.job_id, "Replacing previous simulation outcome");
        }
        self.stop_polling();
        self.store.clear()?;
        self.state = JobState::Idle;
        Ok(())
    }
}

impl Drop for JobStateMachine {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
