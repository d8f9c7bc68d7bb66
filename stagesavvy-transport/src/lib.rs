//! Port abstraction layer for the StageSavvy MIDI translator
//!
//! This crate provides a unified interface over MIDI port backends:
//!
//! - `MidirBackend` (feature `midi-io`): ALSA/CoreMIDI/WinMM ports via midir
//! - `VirtualBackend`: in-memory ports for tests and offline runs
//!
//! The routing engine only ever sees the [`MidiBackend`] and [`OutputPort`]
//! traits.

pub mod error;
pub mod types;
pub mod virtual_backend;

#[cfg(feature = "midi-io")]
mod midir_backend;

pub use error::TransportError;
pub use types::{match_port_name, MessageKind, MidiEvent, MidiMessage, PortDirection};
pub use virtual_backend::{SentMessage, VirtualBackend, VirtualOutput};

#[cfg(feature = "midi-io")]
pub use midir_backend::MidirBackend;

use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Where an input connection delivers decoded events
pub type EventSink = mpsc::UnboundedSender<MidiEvent>;

/// A live listener on an input port
///
/// Events keep flowing into the sink until this value is dropped.
pub struct InputConnection {
    port: Arc<str>,
    _guard: Box<dyn Any + Send>,
}

impl InputConnection {
    /// Wrap a backend-specific connection object
    pub fn new(port: impl Into<Arc<str>>, guard: impl Any + Send) -> Self {
        Self {
            port: port.into(),
            _guard: Box::new(guard),
        }
    }

    /// Configured name of the port this connection listens on
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl std::fmt::Debug for InputConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputConnection")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// An open output port
///
/// Implementations must tolerate concurrent `send` calls; delayed note-off
/// tasks share the handle with the dispatch loops.
pub trait OutputPort: Send + Sync {
    /// Name the port was opened with
    fn name(&self) -> &str;

    /// Send one message, fire-and-forget
    fn send(&self, message: &MidiMessage) -> Result<(), TransportError>;
}

/// The port capability every backend implements
pub trait MidiBackend: Send + Sync {
    /// List the names of currently available ports
    fn list_ports(&self, direction: PortDirection) -> Result<Vec<String>, TransportError>;

    /// Resolve a configured input name to a live port name
    ///
    /// Returns `PortNotFound` when the device is not attached.
    fn find_input(&self, name: &str) -> Result<String, TransportError> {
        let available = self.list_ports(PortDirection::Input)?;
        match_port_name(&available, name)
            .map(str::to_string)
            .ok_or_else(|| TransportError::PortNotFound(name.to_string()))
    }

    /// Start delivering events from input `name` into `sink`
    ///
    /// Delivered events carry `name` as their port, not the backend's
    /// decorated port name.
    fn listen(&self, name: &str, sink: EventSink) -> Result<InputConnection, TransportError>;

    /// Open (or create) output `name`
    fn open_output(&self, name: &str) -> Result<Arc<dyn OutputPort>, TransportError>;
}
