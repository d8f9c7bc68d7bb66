//! Transport error types

use thiserror::Error;

/// Errors that can occur while talking to MIDI ports
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("MIDI port not found: {0}")]
    PortNotFound(String),

    #[error("MIDI backend unavailable: {0}")]
    Backend(String),

    #[error("Failed to connect to MIDI port {port}: {reason}")]
    Connect { port: String, reason: String },

    #[error("Failed to send to MIDI port {port}: {reason}")]
    Send { port: String, reason: String },

    #[error("Invalid MIDI message: {0:02X?}")]
    InvalidMessage(Vec<u8>),
}

#[cfg(feature = "midi-io")]
impl From<midir::InitError> for TransportError {
    fn from(e: midir::InitError) -> Self {
        TransportError::Backend(e.to_string())
    }
}
