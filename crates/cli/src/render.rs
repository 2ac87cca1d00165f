//! Plain-text rendering of tracker state for the terminal.

use qsim_core::job::JobSession;
use qsim_tracker::machine::{FailureKind, Navigation, Outcome};

/// Width of the progress bar in characters.
const BAR_WIDTH: usize = 20;

/// One line describing `outcome`.
pub fn outcome_line(outcome: &Outcome) -> String {
    match outcome {
        Outcome::InProgress {
            job_id,
            current,
            total,
            percent,
            message,
        } => format!(
            "[{}] {percent:>3}% {current}/{total} shots  {message} (job {job_id})",
            bar(*percent)
        ),
        Outcome::Completed { job_id, total } => {
            format!("Simulation {job_id} complete: {total} shots generated.")
        }
        Outcome::Failed { job_id, failure } => match failure.kind {
            FailureKind::Job => format!("Simulation {job_id} failed: {}", failure.message),
            FailureKind::Connectivity => format!("Simulation {job_id}: {}", failure.message),
        },
    }
}

/// Follow-up commands offered for a terminal outcome.
pub fn next_steps(outcome: &Outcome) -> Option<&'static str> {
    match outcome {
        Outcome::InProgress { .. } => None,
        Outcome::Completed { .. } => Some("Run `qsim ack view` to open the shots or `qsim ack dismiss`."),
        Outcome::Failed { .. } => Some("Run `qsim ack retry` to start over or `qsim ack dismiss`."),
    }
}

pub fn session_line(session: &JobSession) -> String {
    format!(
        "job {} ({} shots, {}) started {} - {}",
        session.job_id,
        session.total,
        session.labels.progress_message(),
        session.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        session.status,
    )
}

pub fn navigation_line(navigation: &Navigation) -> String {
    match navigation {
        Navigation::Results { job_id } => {
            format!("Shots for simulation {job_id}: {}", navigation.path())
        }
        Navigation::NewSimulation => format!("Create a new simulation: {}", navigation.path()),
    }
}

fn bar(percent: u32) -> String {
    let filled = (percent.min(100) as usize * BAR_WIDTH) / 100;
    format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}
