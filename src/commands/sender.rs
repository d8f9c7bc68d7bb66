//! Text-to-MIDI sender command.

use std::path::Path;

use stagesavvy::sender::SenderServer;
use tracing::info;

use super::{open_backend, stop_channel, CommandResult};

/// Run the sender until Ctrl-C or a `Stop` line
pub async fn run(socket: &Path, port_name: &str) -> CommandResult {
    let backend = open_backend();
    let port = backend.open_output(port_name)?;
    let server = SenderServer::bind(socket, port).await?;

    let (stop_tx, mut stop_rx) = stop_channel();
    tokio::select! {
        _ = stop_rx.recv() => {}
        _ = server.serve(stop_tx) => {}
    }
    info!("Sender stopped");
    Ok(())
}
