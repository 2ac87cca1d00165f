//! Job state machine behaviour against a scripted server.
//!
//! All tests run on a paused clock, so poll delays elapse instantly and
//! fetch timestamps reflect the scheduled backoff exactly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use qsim_core::error::CoreError;
use qsim_core::job::{JobLabels, JobSession, JobStatus};
use qsim_core::simulation::SimulationRequest;
use qsim_tracker::api::SimulationBackend;
use qsim_tracker::error::TrackerError;
use qsim_tracker::events::TrackerEvent;
use qsim_tracker::machine::{
    Acknowledgment, FailureKind, JobState, JobStateMachine, Navigation, Outcome,
    CONNECTIVITY_ERROR_MESSAGE,
};
use qsim_tracker::poller::PollEvent;
use qsim_tracker::store::{MemorySessionStore, SessionStore};

use common::{complete, failed, poll_config, processing, Reply, ScriptedBackend};

fn tracker(backend: &Arc<ScriptedBackend>) -> (JobStateMachine, MemorySessionStore) {
    let store = MemorySessionStore::new();
    let dyn_backend: Arc<dyn SimulationBackend> = backend.clone();
    let machine = JobStateMachine::new(Box::new(store.clone()), dyn_backend, poll_config());
    (machine, store)
}

fn request(shots: u32) -> SimulationRequest {
    SimulationRequest::new(1, 2, shots)
}

fn labels() -> JobLabels {
    JobLabels::new("|0>", "|X|")
}

// ---------------------------------------------------------------------------
// Test: the reference scenario (total=20, one progress poll, then complete)
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn submit_poll_complete_and_view() {
    let backend = ScriptedBackend::new([processing(5, 20), complete(20)]);
    backend.accept_next(42, 20);
    let (mut machine, store) = tracker(&backend);

    let session = machine.submit(&request(20), labels()).await.unwrap();
    assert_eq!(session.job_id, 42);
    assert_eq!(session.total, 20);
    assert_eq!(store.read().unwrap().unwrap().status, JobStatus::Processing);

    // First event: progress 5/20.
    assert!(machine.next_event().await.unwrap());
    assert_matches!(
        machine.outcome(),
        Some(Outcome::InProgress { job_id: 42, current: 5, total: 20, percent: 25, .. })
    );

    let outcome = machine.wait_for_outcome().await.unwrap();
    assert_eq!(outcome, Outcome::Completed { job_id: 42, total: 20 });
    assert_eq!(backend.cleared_ids(), vec![42]);
    assert!(!machine.is_polling());

    // The store keeps reporting complete until the user acknowledges.
    assert_eq!(store.read().unwrap().unwrap().status, JobStatus::Complete);

    let nav = machine.acknowledge(Acknowledgment::View).unwrap();
    assert_eq!(nav, Some(Navigation::Results { job_id: 42 }));
    assert_eq!(nav.unwrap().path(), "/shots/42");
    assert!(store.read().unwrap().is_none());
    assert_eq!(machine.state(), &JobState::Idle);
}

// ---------------------------------------------------------------------------
// Test: the submission gate rejects before any network call
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_submission_rejected_while_processing() {
    let backend = ScriptedBackend::new([]);
    backend.accept_next(7, 10);
    let (mut machine, store) = tracker(&backend);

    machine.submit(&request(10), labels()).await.unwrap();
    assert!(!machine.can_submit().unwrap());

    let err = machine.submit(&request(10), labels()).await.unwrap_err();
    assert_matches!(err, TrackerError::JobActive { job_id: 7 });
    assert_eq!(backend.create_count(), 1);
    assert_eq!(store.read().unwrap().unwrap().job_id, 7);
}

#[tokio::test(start_paused = true)]
async fn gate_reads_store_written_by_another_tracker() {
    let backend = ScriptedBackend::new([]);
    let (mut first, store) = tracker(&backend);
    first.start_job(3, 10, labels()).unwrap();

    let dyn_backend: Arc<dyn SimulationBackend> = backend.clone();
    let mut second = JobStateMachine::new(Box::new(store.clone()), dyn_backend, poll_config());
    assert!(!second.can_submit().unwrap());
    assert_matches!(
        second.submit(&request(10), labels()).await,
        Err(TrackerError::JobActive { job_id: 3 })
    );
    assert_eq!(backend.create_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: validation errors leave the tracker untouched
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn invalid_request_is_rejected_locally() {
    let backend = ScriptedBackend::new([]);
    let (mut machine, store) = tracker(&backend);

    let err = machine.submit(&request(2), labels()).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(backend.create_count(), 0);
    assert_eq!(machine.state(), &JobState::Idle);
    assert!(store.read().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn server_rejection_is_a_validation_error() {
    let backend = ScriptedBackend::new([]);
    backend.reject_next(404, "Gate with ID 2 not found in database.");
    let (mut machine, store) = tracker(&backend);

    let err = machine.submit(&request(10), labels()).await.unwrap_err();
    assert!(err.is_validation());
    assert_eq!(err.to_string(), "Gate with ID 2 not found in database.");
    assert_eq!(machine.state(), &JobState::Idle);
    assert!(store.read().unwrap().is_none());
    assert!(machine.can_submit().unwrap());
}

// ---------------------------------------------------------------------------
// Test: job errors and connectivity errors are distinct terminal outcomes
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn job_error_then_retry() {
    let backend = ScriptedBackend::new([processing(2, 10), failed("Error generating shots: boom")]);
    let (mut machine, store) = tracker(&backend);
    machine.start_job(9, 10, labels()).unwrap();

    let outcome = machine.wait_for_outcome().await.unwrap();
    assert_matches!(
        outcome,
        Outcome::Failed { job_id: 9, ref failure }
            if failure.kind == FailureKind::Job && failure.message == "Error generating shots: boom"
    );
    assert_eq!(store.read().unwrap().unwrap().status, JobStatus::Error);
    assert!(backend.cleared_ids().is_empty());

    assert_eq!(
        machine.acknowledge(Acknowledgment::Retry).unwrap(),
        Some(Navigation::NewSimulation)
    );
    assert!(store.read().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn three_consecutive_failures_lose_connection() {
    let backend = ScriptedBackend::new([Reply::Fail, Reply::Fail, Reply::Fail]);
    let (mut machine, store) = tracker(&backend);
    machine.start_job(5, 10, labels()).unwrap();

    let outcome = machine.wait_for_outcome().await.unwrap();
    assert_matches!(
        outcome,
        Outcome::Failed { ref failure, .. }
            if failure.kind == FailureKind::Connectivity && failure.message == CONNECTIVITY_ERROR_MESSAGE
    );
    assert_eq!(backend.fetch_count(), 3);
    assert_eq!(store.read().unwrap().unwrap().status, JobStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn success_between_failures_resets_retry_budget() {
    let backend = ScriptedBackend::new([
        Reply::Fail,
        Reply::Fail,
        processing(4, 10),
        Reply::Fail,
        Reply::Fail,
        Reply::Fail,
        complete(10),
    ]);
    let (mut machine, _store) = tracker(&backend);
    machine.start_job(5, 10, labels()).unwrap();

    let outcome = machine.wait_for_outcome().await.unwrap();
    assert_matches!(outcome, Outcome::Failed { ref failure, .. } if failure.kind == FailureKind::Connectivity);
    // Five failures in total, not four.
    assert_eq!(backend.fetch_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_linearly() {
    let backend = ScriptedBackend::new([Reply::Fail, Reply::Fail, processing(1, 10), complete(10)]);
    let (mut machine, _store) = tracker(&backend);
    machine.start_job(5, 10, labels()).unwrap();

    machine.wait_for_outcome().await.unwrap();
    assert_eq!(
        backend.fetch_gaps(),
        vec![
            Duration::from_millis(600),
            Duration::from_millis(900),
            Duration::from_millis(300),
        ]
    );
}

// ---------------------------------------------------------------------------
// Test: not-found counts as completion and cleanup stays best-effort
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn not_found_is_treated_as_complete() {
    let backend = ScriptedBackend::new([processing(3, 10), Reply::NotFound]);
    let (mut machine, store) = tracker(&backend);
    machine.start_job(11, 10, labels()).unwrap();

    let outcome = machine.wait_for_outcome().await.unwrap();
    assert_eq!(outcome, Outcome::Completed { job_id: 11, total: 10 });
    assert_eq!(store.read().unwrap().unwrap().status, JobStatus::Complete);
    assert_eq!(backend.cleared_ids(), vec![11]);
}

#[tokio::test(start_paused = true)]
async fn failed_cleanup_does_not_block_completion() {
    let backend = ScriptedBackend::with_failing_cleanup([complete(10)]);
    let dyn_backend: Arc<dyn SimulationBackend> = backend.clone();
    let store = MemorySessionStore::new();
    let mut machine = JobStateMachine::new(Box::new(store.clone()), dyn_backend, poll_config());
    machine.start_job(12, 10, labels()).unwrap();

    let outcome = machine.wait_for_outcome().await.unwrap();
    assert_eq!(outcome, Outcome::Completed { job_id: 12, total: 10 });
    assert_eq!(backend.cleared_ids(), vec![12]);
}

#[tokio::test(start_paused = true)]
async fn stalled_cleanup_does_not_hold_up_completion() {
    let backend = ScriptedBackend::with_stalled_cleanup([complete(10)]);
    let dyn_backend: Arc<dyn SimulationBackend> = backend.clone();
    let store = MemorySessionStore::new();
    let mut machine = JobStateMachine::new(Box::new(store.clone()), dyn_backend, poll_config());
    machine.start_job(13, 10, labels()).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(3600), machine.wait_for_outcome())
        .await
        .expect("completion waited on cleanup")
        .unwrap();
    assert_eq!(outcome, Outcome::Completed { job_id: 13, total: 10 });
    assert_eq!(store.read().unwrap().unwrap().status, JobStatus::Complete);
    assert_eq!(backend.cleared_ids(), vec![13]);
}

// ---------------------------------------------------------------------------
// Test: events outside a matching state are ignored
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn idle_ignores_poll_events_and_acknowledgments() {
    let backend = ScriptedBackend::new([]);
    let (mut machine, store) = tracker(&backend);

    machine
        .apply(PollEvent::Completed { snapshot: None })
        .unwrap();
    machine
        .apply(PollEvent::JobFailed { message: "late".into() })
        .unwrap();
    assert_eq!(machine.state(), &JobState::Idle);
    assert_eq!(machine.acknowledge(Acknowledgment::Dismiss).unwrap(), None);
    assert!(store.read().unwrap().is_none());
    assert!(!machine.next_event().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn late_events_do_not_reopen_a_finished_job() {
    let backend = ScriptedBackend::new([complete(10)]);
    let (mut machine, store) = tracker(&backend);
    machine.start_job(4, 10, labels()).unwrap();
    machine.wait_for_outcome().await.unwrap();

    machine
        .apply(PollEvent::JobFailed { message: "duplicate".into() })
        .unwrap();
    machine
        .apply(PollEvent::Progress(qsim_core::progress::ProgressSnapshot::new(
            1,
            10,
            JobStatus::Processing,
        )))
        .unwrap();

    assert_matches!(machine.state(), JobState::Complete { .. });
    assert_eq!(store.read().unwrap().unwrap().status, JobStatus::Complete);
    assert!(machine.can_submit().unwrap());
}

#[tokio::test(start_paused = true)]
async fn acknowledgment_must_match_outcome() {
    let backend = ScriptedBackend::new([]);
    let (mut machine, store) = tracker(&backend);
    machine.start_job(4, 10, labels()).unwrap();

    // Still processing: nothing to acknowledge yet.
    assert_matches!(
        machine.acknowledge(Acknowledgment::Dismiss),
        Err(TrackerError::Core(CoreError::Conflict(_)))
    );

    machine
        .apply(PollEvent::Completed { snapshot: None })
        .unwrap();
    assert_matches!(
        machine.acknowledge(Acknowledgment::Retry),
        Err(TrackerError::Core(CoreError::Conflict(_)))
    );
    assert_matches!(machine.state(), JobState::Complete { .. });
    assert!(store.read().unwrap().is_some());

    assert_eq!(machine.acknowledge(Acknowledgment::Dismiss).unwrap(), None);
    assert!(store.read().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn start_job_requires_idle() {
    let backend = ScriptedBackend::new([]);
    let (mut machine, _store) = tracker(&backend);
    machine.start_job(1, 10, labels()).unwrap();

    assert_matches!(
        machine.start_job(2, 10, labels()),
        Err(TrackerError::Core(CoreError::Conflict(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn start_job_keeps_unacknowledged_outcome() {
    for status in [JobStatus::Error, JobStatus::Complete] {
        let backend = ScriptedBackend::new([]);
        let store = MemorySessionStore::new();
        let mut leftover = JobSession::new(5, 10, labels());
        leftover.status = status;
        store.replace(&leftover).unwrap();

        let dyn_backend: Arc<dyn SimulationBackend> = backend.clone();
        let mut machine = JobStateMachine::new(Box::new(store.clone()), dyn_backend, poll_config());
        assert_matches!(
            machine.start_job(6, 10, labels()),
            Err(TrackerError::Core(CoreError::Conflict(_)))
        );

        let stored = store.read().unwrap().unwrap();
        assert_eq!(stored.job_id, 5);
        assert_eq!(stored.status, status);
        assert_eq!(machine.state(), &JobState::Idle);
        assert!(!machine.is_polling());
    }
}

#[tokio::test(start_paused = true)]
async fn start_job_refuses_job_running_elsewhere() {
    let backend = ScriptedBackend::new([]);
    let store = MemorySessionStore::new();
    store.write(&JobSession::new(5, 10, labels())).unwrap();

    let dyn_backend: Arc<dyn SimulationBackend> = backend.clone();
    let mut machine = JobStateMachine::new(Box::new(store.clone()), dyn_backend, poll_config());
    assert_matches!(
        machine.start_job(6, 10, labels()),
        Err(TrackerError::JobActive { job_id: 5 })
    );
    assert_eq!(backend.fetch_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: a new submission replaces an unacknowledged outcome
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn submission_after_terminal_outcome_replaces_it() {
    let backend = ScriptedBackend::new([failed("boom")]);
    backend.accept_next(1, 10);
    let (mut machine, store) = tracker(&backend);

    machine.submit(&request(10), labels()).await.unwrap();
    machine.wait_for_outcome().await.unwrap();
    assert!(machine.can_submit().unwrap());

    backend.accept_next(2, 15);
    let session = machine.submit(&request(15), labels()).await.unwrap();
    assert_eq!(session.job_id, 2);
    assert_matches!(machine.state(), JobState::Processing { .. });

    let stored = store.read().unwrap().unwrap();
    assert_eq!(stored.job_id, 2);
    assert_eq!(stored.status, JobStatus::Processing);
}

// ---------------------------------------------------------------------------
// Test: observers see every transition in order
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn broadcasts_transitions() {
    let backend = ScriptedBackend::new([processing(10, 20), complete(20)]);
    let (mut machine, _store) = tracker(&backend);
    let mut rx = machine.subscribe();

    machine.start_job(8, 20, labels()).unwrap();
    machine.wait_for_outcome().await.unwrap();
    machine.acknowledge(Acknowledgment::Dismiss).unwrap();

    assert_eq!(rx.recv().await.unwrap(), TrackerEvent::JobStarted { job_id: 8, total: 20 });
    assert_eq!(
        rx.recv().await.unwrap(),
        TrackerEvent::JobProgress {
            job_id: 8,
            current: 10,
            total: 20,
            percent: 50,
        }
    );
    assert_eq!(rx.recv().await.unwrap(), TrackerEvent::JobCompleted { job_id: 8 });
    assert_eq!(
        rx.recv().await.unwrap(),
        TrackerEvent::JobAcknowledged {
            job_id: 8,
            action: Acknowledgment::Dismiss,
        }
    );
}
