#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use qsim_core::job::JobStatus;
use qsim_core::progress::ProgressSnapshot;
use qsim_core::simulation::SimulationRequest;
use qsim_core::types::DbId;
use qsim_tracker::api::{ApiError, CreatedSimulation, SimulationBackend};
use qsim_tracker::poller::PollConfig;
use tokio::time::Instant;

/// One scripted answer to `fetch_progress`.
#[derive(Debug, Clone)]
pub enum Reply {
    Snapshot(ProgressSnapshot),
    NotFound,
    Fail,
}

pub fn processing(current: u32, total: u32) -> Reply {
    Reply::Snapshot(ProgressSnapshot::new(current, total, JobStatus::Processing))
}

pub fn complete(total: u32) -> Reply {
    Reply::Snapshot(ProgressSnapshot::new(total, total, JobStatus::Complete))
}

pub fn failed(message: &str) -> Reply {
    Reply::Snapshot(ProgressSnapshot::new(0, 0, JobStatus::Error).with_message(message))
}

/// In-memory stand-in for the simulation server.
///
/// `fetch_progress` answers from a script; once the script runs out the
/// job stays `processing` forever.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Reply>>,
    next_job: Mutex<Option<Result<CreatedSimulation, (u16, String)>>>,
    fail_cleanup: bool,
    stall_cleanup: bool,
    pub creates: AtomicUsize,
    pub fetches: Mutex<Vec<(DbId, Instant)>>,
    pub clears: Mutex<Vec<DbId>>,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn with_failing_cleanup(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            fail_cleanup: true,
            ..Default::default()
        })
    }

    /// `clear_progress` never resolves.
    pub fn with_stalled_cleanup(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            stall_cleanup: true,
            ..Default::default()
        })
    }

    /// Accept the next `create_simulation` call with this job.
    pub fn accept_next(&self, sim_id: DbId, total: u32) {
        *self.next_job.lock().unwrap() = Some(Ok(CreatedSimulation {
            message: "Simulation started".into(),
            sim_id,
            total,
        }));
    }

    /// Reject the next `create_simulation` call.
    pub fn reject_next(&self, status: u16, message: &str) {
        *self.next_job.lock().unwrap() = Some(Err((status, message.to_string())));
    }

    pub fn push(&self, replies: impl IntoIterator<Item = Reply>) {
        self.script.lock().unwrap().extend(replies);
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn fetched_ids(&self) -> Vec<DbId> {
        self.fetches.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    /// Time between consecutive fetches.
    pub fn fetch_gaps(&self) -> Vec<Duration> {
        let fetches = self.fetches.lock().unwrap();
        fetches.windows(2).map(|w| w[1].1 - w[0].1).collect()
    }

    pub fn cleared_ids(&self) -> Vec<DbId> {
        self.clears.lock().unwrap().clone()
    }
}

#[async_trait]
impl SimulationBackend for ScriptedBackend {
    async fn create_simulation(
        &self,
        request: &SimulationRequest,
    ) -> Result<CreatedSimulation, ApiError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        match self.next_job.lock().unwrap().take() {
            Some(Ok(created)) => Ok(created),
            Some(Err((status, message))) => Err(ApiError::Rejected { status, message }),
            None => Ok(CreatedSimulation {
                message: "Simulation started".into(),
                sim_id: 1,
                total: request.num_shots,
            }),
        }
    }

    async fn fetch_progress(&self, job_id: DbId) -> Result<ProgressSnapshot, ApiError> {
        self.fetches.lock().unwrap().push((job_id, Instant::now()));
        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Snapshot(snapshot)) => Ok(snapshot),
            Some(Reply::NotFound) => Err(ApiError::NotFound(job_id)),
            Some(Reply::Fail) => Err(ApiError::ApiError {
                status: 503,
                body: "service unavailable".into(),
            }),
            None => Ok(ProgressSnapshot::new(0, 0, JobStatus::Processing)),
        }
    }

    async fn clear_progress(&self, job_id: DbId) -> Result<(), ApiError> {
        self.clears.lock().unwrap().push(job_id);
        if self.stall_cleanup {
            std::future::pending::<()>().await;
        }
        if self.fail_cleanup {
            return Err(ApiError::ApiError {
                status: 500,
                body: "cleanup exploded".into(),
            });
        }
        Ok(())
    }
}

pub fn poll_config() -> PollConfig {
    PollConfig::default()
}
