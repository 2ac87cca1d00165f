//! Progress polling with bounded linear backoff.
//!
//! [`ProgressPoller::spawn`] starts one task per job that asks the server
//! for a [`ProgressSnapshot`], waits, and asks again until the job reaches
//! a terminal status, the retry ceiling is hit, or [`ProgressPoller::stop`]
//! is called. The per-response decisions live in [`PollCursor`], a plain
//! state machine with no runtime dependencies.
//!
//! Only one request is ever outstanding: the next poll is scheduled
//! strictly after the previous one resolves, so slow responses throttle
//! the request rate on their own. The cleanup call after completion runs
//! once the terminal event is delivered and the channel is closed, so a
//! slow cleanup never holds up the owner.

use std::sync::Arc;
use std::time::Duration;

use qsim_core::job::JobStatus;
use qsim_core::progress::ProgressSnapshot;
use qsim_core::types::DbId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, SimulationBackend};

/// Upper bound on the cleanup call issued after a job completes.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunable parameters for the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between a response and the next request.
    pub interval: Duration,
    /// Consecutive transient failures that end polling.
    pub max_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
            max_failures: 3,
        }
    }
}

/// Delay before retrying after `failures` consecutive failures.
pub fn retry_delay(config: &PollConfig, failures: u32) -> Duration {
    config.interval * (failures + 1)
}

/// What a single poll produced, with transport details stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Snapshot(ProgressSnapshot),
    /// The server no longer knows the job.
    NotFound,
    /// Network error, unexpected status, or unreadable body.
    Transient(String),
}

impl From<Result<ProgressSnapshot, ApiError>> for PollOutcome {
    fn from(result: Result<ProgressSnapshot, ApiError>) -> Self {
        match result {
            Ok(snapshot) => PollOutcome::Snapshot(snapshot),
            Err(ApiError::NotFound(_)) => PollOutcome::NotFound,
            Err(e) => PollOutcome::Transient(e.to_string()),
        }
    }
}

/// Reported by a poller to its owner, in receipt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// The job is still running.
    Progress(ProgressSnapshot),
    /// The job finished. `snapshot` is `None` when completion was inferred
    /// from a not-found response.
    Completed { snapshot: Option<ProgressSnapshot> },
    /// The server reported the job itself failed.
    JobFailed { message: String },
    /// Polling gave up after repeated transient failures.
    ConnectionLost { failures: u32, last_error: String },
}

/// Next step chosen by the [`PollCursor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// Poll again after `delay`, optionally reporting progress first.
    Continue {
        delay: Duration,
        progress: Option<ProgressSnapshot>,
    },
    /// Stop polling and report `event`. `cleanup` asks for the server-side
    /// progress record to be released afterwards.
    Finish { event: PollEvent, cleanup: bool },
}

/// Decision state for one polling run: the consecutive-failure counter.
#[derive(Debug, Clone)]
pub struct PollCursor {
    config: PollConfig,
    failures: u32,
}

impl PollCursor {
    /// A fresh cursor. Failure counting always starts at zero.
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn advance(&mut self, outcome: PollOutcome) -> PollStep {
        match outcome {
            PollOutcome::Snapshot(snapshot) => {
                self.failures = 0;
                match snapshot.status {
                    JobStatus::Processing => PollStep::Continue {
                        delay: self.config.interval,
                        progress: Some(snapshot),
                    },
                    JobStatus::Complete => PollStep::Finish {
                        event: PollEvent::Completed {
                            snapshot: Some(snapshot),
                        },
                        cleanup: true,
                    },
                    JobStatus::Error => PollStep::Finish {
                        event: PollEvent::JobFailed {
                            message: snapshot.error_message(),
                        },
                        cleanup: false,
                    },
                }
            }
            PollOutcome::NotFound => {
                self.failures = 0;
                PollStep::Finish {
                    event: PollEvent::Completed { snapshot: None },
                    cleanup: true,
                }
            }
            PollOutcome::Transient(error) => {
                self.failures += 1;
                if self.failures >= self.config.max_failures {
                    PollStep::Finish {
                        event: PollEvent::ConnectionLost {
                            failures: self.failures,
                            last_error: error,
                        },
                        cleanup: false,
                    }
                } else {
                    PollStep::Continue {
                        delay: retry_delay(&self.config, self.failures),
                        progress: None,
                    }
                }
            }
        }
    }
}

/// Handle to a running poll task.
///
/// Dropping the handle stops the task.
pub struct ProgressPoller {
    job_id: DbId,
    cancel: CancellationToken,
    task_handle: JoinHandle<()>,
}

impl ProgressPoller {
    /// Start polling `job_id`. Must be called inside a tokio runtime.
    ///
    /// `total` fills in snapshots that omit it. Events arrive on the
    /// returned receiver; the channel closes when the task exits.
    pub fn spawn(
        backend: Arc<dyn SimulationBackend>,
        job_id: DbId,
        total: u32,
        config: PollConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let task_handle = tokio::spawn(async move {
            tracing::debug!(job_id, "Starting progress poller");
            let cleanup =
                run_poll_loop(backend.as_ref(), job_id, total, config, &event_tx, &cancel_clone)
                    .await;
            // Close the channel before cleanup so the owner never waits on it.
            drop(event_tx);
            if cleanup {
                release_progress(backend.as_ref(), job_id).await;
            }
            tracing::debug!(job_id, "Progress poller exited");
        });

        let poller = Self {
            job_id,
            cancel,
            task_handle,
        };
        (poller, event_rx)
    }

    pub fn job_id(&self) -> DbId {
        self.job_id
    }

    /// Cancel any pending or in-flight poll. Safe to call repeatedly.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the poll task has exited.
    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Core loop: poll -> decide -> wait, until finished or cancelled.
///
/// Returns `true` when the server-side progress record should be
/// released. The terminal event has already been delivered by then.
async fn run_poll_loop(
    backend: &dyn SimulationBackend,
    job_id: DbId,
    total: u32,
    config: PollConfig,
    event_tx: &mpsc::UnboundedSender<PollEvent>,
    cancel: &CancellationToken,
) -> bool {
    let mut cursor = PollCursor::new(config);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let outcome: PollOutcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            result = backend.fetch_progress(job_id) => result.into(),
        };

        match cursor.advance(outcome) {
            PollStep::Continue { delay, progress } => {
                match progress {
                    Some(mut snapshot) => {
                        if snapshot.total == 0 {
                            snapshot.total = total;
                        }
                        tracing::trace!(
                            job_id,
                            current = snapshot.current,
                            total = snapshot.total,
                            "Progress update",
                        );
                        if event_tx.send(PollEvent::Progress(snapshot)).is_err() {
                            return false;
                        }
                    }
                    None => {
                        tracing::warn!(
                            job_id,
                            attempt,
                            failures = cursor.failures(),
                            delay_ms = delay.as_millis() as u64,
                            "Progress poll failed, retrying",
                        );
                    }
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            PollStep::Finish { event, cleanup } => {
                if let PollEvent::Completed { snapshot: None } = &event {
                    // Also what an id the server never issued looks like.
                    tracing::warn!(job_id, "Progress record not found, treating job as complete");
                }
                if !cancel.is_cancelled() {
                    let _ = event_tx.send(event);
                }
                return cleanup;
            }
        }
    }
}

/// Best-effort release of the server-side progress record, bounded by
/// [`CLEANUP_TIMEOUT`].
async fn release_progress(backend: &dyn SimulationBackend, job_id: DbId) {
    match tokio::time::timeout(CLEANUP_TIMEOUT, backend.clear_progress(job_id)).await {
        Ok(Ok(())) => tracing::debug!(job_id, "Progress record cleared"),
        Ok(Err(e)) => tracing::warn!(job_id, error = %e, "Failed to clear progress record"),
        Err(_) => tracing::warn!(
            job_id,
            timeout_secs = CLEANUP_TIMEOUT.as_secs(),
            "Timed out clearing progress record",
        ),
    }
}
