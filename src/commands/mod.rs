//! Command handlers for the CLI application.
//!
//! - `daemon`: the translator itself (run)
//! - `utility`: control client and inspection (ctl, check, ports)
//! - `sender`: text-to-MIDI sender

pub mod daemon;
pub mod sender;
pub mod utility;

use std::sync::Arc;

use stagesavvy_transport::MidiBackend;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Client name registered with the MIDI system
pub const CLIENT_NAME: &str = "StageSavvy";

/// Open the MIDI backend the build was configured with
#[cfg(feature = "midi-io")]
pub fn open_backend() -> Arc<dyn MidiBackend> {
    Arc::new(stagesavvy_transport::MidirBackend::new(CLIENT_NAME))
}

/// Without `midi-io` only in-memory ports exist
#[cfg(not(feature = "midi-io"))]
pub fn open_backend() -> Arc<dyn MidiBackend> {
    tracing::warn!("Built without midi-io; using in-memory ports");
    Arc::new(stagesavvy_transport::VirtualBackend::new())
}

/// Resolve on Ctrl-C or when anything sends on the returned channel
pub fn stop_channel() -> (
    tokio::sync::mpsc::UnboundedSender<()>,
    tokio::sync::mpsc::UnboundedReceiver<()>,
) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(());
    })
    .ok();
    (tx, rx)
}
