mod render;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qsim_core::job::JobLabels;
use qsim_core::simulation::SimulationRequest;
use qsim_tracker::api::{SimulationApi, SimulationBackend};
use qsim_tracker::bootstrap::rehydrate;
use qsim_tracker::config::TrackerConfig;
use qsim_tracker::machine::{Acknowledgment, JobState, JobStateMachine};
use qsim_tracker::store::{FileSessionStore, SessionStore};

#[derive(Parser)]
#[command(author, version, about = "Submit quantum simulations and track their progress")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a simulation and follow it to completion
    Submit {
        /// Initial state id
        #[arg(long, value_name = "ID")]
        state_id: i64,

        /// Gate id
        #[arg(long, value_name = "ID")]
        gate_id: i64,

        /// Number of shots (5-100)
        #[arg(long, value_name = "N")]
        shots: u32,

        /// Initial state symbol, used in progress captions
        #[arg(long, default_value = "")]
        state_symbol: String,

        /// Gate symbol, used in progress captions
        #[arg(long, default_value = "")]
        gate_symbol: String,

        /// Return once the server accepts the job
        #[arg(long)]
        detach: bool,
    },
    /// Keep following the stored job after a restart
    Resume,
    /// Print the stored job without contacting the server
    Status,
    /// Close a finished job's outcome
    Ack {
        /// view, retry or dismiss
        action: Acknowledgment,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qsim_cli=info,qsim_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = TrackerConfig::from_env().context("Invalid configuration")?;
    tracing::debug!(
        api_url = %config.api_url,
        state_dir = %config.state_dir.display(),
        "Loaded tracker configuration",
    );

    let store = FileSessionStore::new(&config.state_dir);

    if let Command::Status = args.command {
        match store.read()? {
            Some(session) => println!("{}", render::session_line(&session)),
            None => println!("No simulation in progress."),
        }
        return Ok(());
    }

    let backend: Arc<dyn SimulationBackend> =
        Arc::new(SimulationApi::with_timeout(&config.api_url, config.request_timeout)?);
    let mut machine = rehydrate(Box::new(store), backend, config.poll)?;

    match args.command {
        Command::Submit {
            state_id,
            gate_id,
            shots,
            state_symbol,
            gate_symbol,
            detach,
        } => {
            let request = SimulationRequest::new(state_id, gate_id, shots);
            let session = machine
                .submit(&request, JobLabels::new(state_symbol, gate_symbol))
                .await?;
            println!("Simulation {} started ({} shots).", session.job_id, session.total);

            if detach {
                machine.stop_polling();
                println!("Run `qsim resume` to follow it.");
                return Ok(());
            }
            follow(&mut machine).await
        }
        Command::Resume => match machine.state() {
            JobState::Idle => {
                println!("No simulation to resume.");
                Ok(())
            }
            _ => follow(&mut machine).await,
        },
        Command::Ack { action } => {
            match machine.acknowledge(action)? {
                Some(navigation) => println!("{}", render::navigation_line(&navigation)),
                None => println!("Nothing left to acknowledge."),
            }
            Ok(())
        }
        Command::Status => Ok(()),
    }
}

/// Print progress until the job finishes or the user interrupts.
///
/// Interrupting only detaches: the stored session stays `processing`
/// and `qsim resume` picks it up again.
async fn follow(machine: &mut JobStateMachine) -> anyhow::Result<()> {
    while let JobState::Processing { .. } = machine.state() {
        let more = tokio::select! {
            result = machine.next_event() => result?,
            _ = tokio::signal::ctrl_c() => {
                machine.stop_polling();
                println!("\nDetached. Run `qsim resume` to keep following the job.");
                return Ok(());
            }
        };
        if !more {
            anyhow::bail!("Progress polling stopped before the simulation finished");
        }
        if let Some(outcome) = machine.outcome().filter(|_| !machine.state().is_terminal()) {
            println!("{}", render::outcome_line(&outcome));
        }
    }

    if let Some(outcome) = machine.outcome() {
        println!("{}", render::outcome_line(&outcome));
        if let Some(hint) = render::next_steps(&outcome) {
            println!("{hint}");
        }
    }
    Ok(())
}
