use std::{mem, path::PathBuf, process};

use fedsim::{
    settings::Settings,
    simulation::Simulation,
    state_machine::{events::RunOutcome, StateMachineInitializer},
    storage::FileStorage,
};
use structopt::StructOpt;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, StructOpt)]
#[structopt(name = "Coordinator")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let mut settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(mem::take(&mut settings.log.filter))
        .with_ansi(true)
        .init();

    let simulation = Simulation::new(&settings).unwrap_or_else(|err| {
        error!("failed to set up the simulation: {}", err);
        process::exit(1);
    });
    let initial_weights = simulation.initial_weights().unwrap_or_else(|err| {
        error!("{}", err);
        process::exit(1);
    });

    let (state_machine, event_subscriber) = StateMachineInitializer::new(
        &settings,
        initial_weights,
        simulation.spawn_clients(),
        FileStorage::new(&settings.checkpoint.path),
    )
    .init()
    .await
    .unwrap_or_else(|err| {
        error!("failed to initialize the state machine: {}", err);
        process::exit(1);
    });

    tokio::select! {
        _ = state_machine.run() => {
            info!("state machine terminated");
        }
        _ = signal::ctrl_c() => {
            warn!("shutting down: interrupted");
            process::exit(130);
        }
    }

    match event_subscriber.outcome_listener().get_latest().event {
        RunOutcome::Finished => info!("training finished"),
        RunOutcome::Aborted(reason) => {
            error!("training aborted: {}", reason);
            process::exit(1);
        }
        RunOutcome::Running => {
            warn!("the state machine stopped before the run was over");
            process::exit(1);
        }
    }
}
