//! StageSavvy MIDI translator CLI
//!
//! Runs the translator daemon and its small helper commands.

use std::process::ExitCode;

use clap::Parser;
use stagesavvy::EngineError;
use tracing::error;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;

/// Exit code when another translator already owns the control socket
const EXIT_ALREADY_RUNNING: u8 = 5;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stagesavvy={0},stagesavvy_transport={0}", cli.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_target(false)
        .init();

    let config = cli
        .config
        .clone()
        .unwrap_or_else(stagesavvy::MappingTree::default_path);

    let result = match cli.command {
        None => commands::daemon::run(&config, &cli::RunArgs::default()).await,
        Some(Commands::Run(args)) => commands::daemon::run(&config, &args).await,
        Some(Commands::Ctl { message, socket }) => commands::utility::ctl(&socket, &message).await,
        Some(Commands::Check) => commands::utility::check(&config),
        Some(Commands::Ports) => commands::utility::ports(),
        Some(Commands::Sender { socket, port_name }) => {
            commands::sender::run(&socket, &port_name).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(EngineError::AlreadyRunning(path)) = e.downcast_ref::<EngineError>() {
                error!("Another instance is running ({}), exiting", path.display());
                return ExitCode::from(EXIT_ALREADY_RUNNING);
            }
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
