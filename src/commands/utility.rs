//! Utility command handlers.

use std::path::Path;

use anyhow::Context;
use stagesavvy::control::send_command;
use stagesavvy::engine::initial_mapping;
use stagesavvy::{Bindings, MappingTree};
use stagesavvy_transport::PortDirection;

use super::{open_backend, CommandResult};

/// Send one control message to the running translator
pub async fn ctl(socket: &Path, message: &str) -> CommandResult {
    send_command(socket, message)
        .await
        .with_context(|| format!("no translator listening on {}", socket.display()))?;
    println!("Sent {message:?} to {}", socket.display());
    Ok(())
}

/// Load and validate the mapping file, then summarize it
pub fn check(config: &Path) -> CommandResult {
    let tree = MappingTree::load(config)
        .with_context(|| format!("loading mappings from {}", config.display()))?;
    let bindings = Bindings::from_tree(&tree)?;

    println!("{}: {} mappings, {} rules", config.display(), tree.mappings.len(), tree.rule_count());
    for table in bindings.tables() {
        let switches = table.switch_rules().count();
        println!(
            "  {:<12} {:>4} rules ({} switch)",
            table.name(),
            table.rules().len(),
            switches
        );
    }
    if let Ok(initial) = initial_mapping(&bindings, None) {
        println!("Startup mapping: {initial}");
    }

    println!("Inputs:");
    for name in bindings.input_ports() {
        println!("  {name}");
    }
    println!("Outputs:");
    for name in bindings.output_ports() {
        println!("  {name}");
    }
    Ok(())
}

/// List the MIDI ports the backend can see
pub fn ports() -> CommandResult {
    let backend = open_backend();
    for (label, direction) in [("Inputs", PortDirection::Input), ("Outputs", PortDirection::Output)] {
        let names = backend.list_ports(direction)?;
        println!("{label}:");
        if names.is_empty() {
            println!("  (none)");
        }
        for name in names {
            println!("  {name}");
        }
    }
    Ok(())
}
