//! The translator daemon.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use stagesavvy::control::ControlServer;
use stagesavvy::{Bindings, Engine, EngineSettings, MappingTree};
use tracing::info;

use super::{open_backend, stop_channel, CommandResult};
use crate::cli::RunArgs;

/// Run the translator until Ctrl-C or a `Stop` control message
pub async fn run(config: &Path, args: &RunArgs) -> CommandResult {
    // Claim the control socket first; a live owner means exit code 5
    let control = ControlServer::bind(&args.socket).await?;

    let tree = MappingTree::load(config)
        .with_context(|| format!("loading mappings from {}", config.display()))?;
    let bindings = Bindings::from_tree(&tree)?;
    info!(
        "Loaded {} mappings ({} rules) from {}",
        tree.mappings.len(),
        tree.rule_count(),
        config.display()
    );

    let settings = EngineSettings {
        default_mapping: args.mapping.clone(),
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
    };
    let engine = Engine::new(open_backend(), bindings, settings)?;
    let switch = engine.switch_handle();

    let (stop_tx, mut stop_rx) = stop_channel();
    let shutdown = async move {
        stop_rx.recv().await;
    };

    info!("Ready. Ctrl+C or \"Stop\" on {} to quit.", control.path().display());
    tokio::select! {
        _ = engine.run(shutdown) => {}
        _ = control.serve(switch, stop_tx) => {}
    }
    Ok(())
}
