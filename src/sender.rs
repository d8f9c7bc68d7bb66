//! Text-to-MIDI sender
//!
//! Exposes one output port and a Unix socket accepting lines such as
//!
//! ```text
//! NoteOn 1 60 100
//! NoteOff 1 60 0
//! CC 1 7 127
//! Stop
//! ```
//!
//! Channels are 1-16 on the wire, 0-15 in [`MidiMessage`]. The note-off value
//! is optional and ignored. Commands need no trailing newline; every read
//! chunk is handled as it arrives.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use stagesavvy_transport::{MidiMessage, OutputPort};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::control::{for_each_command, LocalSocket};
use crate::error::EngineError;

pub const DEFAULT_SENDER_SOCKET: &str = "/tmp/stagesavvy-sender.sock";
pub const DEFAULT_SENDER_PORT: &str = "StageSavvy";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SenderError {
    #[error("empty command")]
    Empty,

    #[error("unknown command \"{0}\"")]
    UnknownCommand(String),

    #[error("{command} takes {expected} arguments, got {found}")]
    Arguments {
        command: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("{field} \"{value}\" out of range")]
    OutOfRange { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderCommand {
    Send(MidiMessage),
    Stop,
}

impl FromStr for SenderCommand {
    type Err = SenderError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(SenderError::Empty)?;
        let args: Vec<&str> = words.collect();

        let (name, counts, expected) = if command.eq_ignore_ascii_case("NoteOn") {
            ("NoteOn", 3..=3, "3")
        } else if command.eq_ignore_ascii_case("NoteOff") {
            // Trailing release value is accepted and dropped
            ("NoteOff", 2..=3, "2 or 3")
        } else if command.eq_ignore_ascii_case("CC") {
            ("CC", 3..=3, "3")
        } else if command.eq_ignore_ascii_case("Stop") {
            return Ok(SenderCommand::Stop);
        } else {
            return Err(SenderError::UnknownCommand(command.to_string()));
        };

        if !counts.contains(&args.len()) {
            return Err(SenderError::Arguments {
                command: name,
                expected,
                found: args.len(),
            });
        }

        let channel = number(args[0], "channel", 1, 16)? - 1;
        let key = number(args[1], "key", 0, 127)?;
        let message = match name {
            "NoteOn" => MidiMessage::note_on(channel, key, number(args[2], "velocity", 0, 127)?),
            "NoteOff" => MidiMessage::note_off(channel, key),
            _ => MidiMessage::control_change(channel, key, number(args[2], "value", 0, 127)?),
        };
        Ok(SenderCommand::Send(message))
    }
}

fn number(raw: &str, field: &'static str, min: u8, max: u8) -> Result<u8, SenderError> {
    raw.parse::<u8>()
        .ok()
        .filter(|n| (min..=max).contains(n))
        .ok_or_else(|| SenderError::OutOfRange {
            field,
            value: raw.to_string(),
        })
}

/// Socket front-end for one output port
pub struct SenderServer {
    socket: LocalSocket,
    port: Arc<dyn OutputPort>,
}

impl SenderServer {
    pub async fn bind(path: &Path, port: Arc<dyn OutputPort>) -> Result<Self, EngineError> {
        let socket = LocalSocket::bind(path).await?;
        info!(
            "Sender for port {} listening on {}",
            port.name(),
            path.display()
        );
        Ok(Self { socket, port })
    }

    /// Accept connections forever; `Stop` is signalled on `stop`
    pub async fn serve(&self, stop: mpsc::UnboundedSender<()>) {
        loop {
            let stream = match self.socket.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Sender accept failed: {}", e);
                    continue;
                }
            };

            let port = Arc::clone(&self.port);
            let stop = stop.clone();
            tokio::spawn(for_each_command(stream, move |line| {
                match line.parse::<SenderCommand>() {
                    Ok(SenderCommand::Send(message)) => match port.send(&message) {
                        Ok(()) => debug!("Sent {}", message),
                        Err(e) => warn!("{}", e),
                    },
                    Ok(SenderCommand::Stop) => {
                        info!("Sender: stop requested");
                        let _ = stop.send(());
                    }
                    Err(e) => warn!("Sender: skipping \"{}\": {}", line.trim(), e),
                }
            }));
        }
    }
}
