//! Common types for the transport layer

use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;

/// Channel-voice message kinds the translator routes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    NoteOn,
    NoteOff,
    ControlChange,
}

impl MessageKind {
    /// Upper-case name used in binding keys and log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::NoteOn => "NOTEON",
            MessageKind::NoteOff => "NOTEOFF",
            MessageKind::ControlChange => "CC",
        }
    }

    fn status_nibble(&self) -> u8 {
        match self {
            MessageKind::NoteOff => 0x80,
            MessageKind::NoteOn => 0x90,
            MessageKind::ControlChange => 0xB0,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single three-byte MIDI channel message
///
/// `channel` is 0-15, `key` and `value` are 0-127. For control changes `key`
/// is the controller number; for notes `value` is the velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiMessage {
    pub kind: MessageKind,
    pub channel: u8,
    pub key: u8,
    pub value: u8,
}

impl MidiMessage {
    pub fn note_on(channel: u8, key: u8, velocity: u8) -> Self {
        Self {
            kind: MessageKind::NoteOn,
            channel: channel & 0x0F,
            key: key & 0x7F,
            value: velocity & 0x7F,
        }
    }

    /// Note-off with zero release velocity
    pub fn note_off(channel: u8, key: u8) -> Self {
        Self {
            kind: MessageKind::NoteOff,
            channel: channel & 0x0F,
            key: key & 0x7F,
            value: 0,
        }
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            kind: MessageKind::ControlChange,
            channel: channel & 0x0F,
            key: controller & 0x7F,
            value: value & 0x7F,
        }
    }

    /// Encode as raw MIDI bytes
    pub fn to_bytes(&self) -> [u8; 3] {
        [
            self.kind.status_nibble() | (self.channel & 0x0F),
            self.key & 0x7F,
            self.value & 0x7F,
        ]
    }

    /// Decode raw MIDI bytes
    ///
    /// Returns `Ok(None)` for well-formed messages the translator does not
    /// route (clock, aftertouch, sysex, ...). A note-on with velocity 0 is
    /// reported as a note-off, as most controllers use it that way.
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<Self>, TransportError> {
        let Some(&status) = bytes.first() else {
            return Err(TransportError::InvalidMessage(Vec::new()));
        };

        let kind = match status & 0xF0 {
            0x80 => MessageKind::NoteOff,
            0x90 => MessageKind::NoteOn,
            0xB0 => MessageKind::ControlChange,
            _ => return Ok(None),
        };

        if bytes.len() < 3 {
            return Err(TransportError::InvalidMessage(bytes.to_vec()));
        }

        let channel = status & 0x0F;
        let key = bytes[1] & 0x7F;
        let value = bytes[2] & 0x7F;

        let kind = match kind {
            MessageKind::NoteOn if value == 0 => MessageKind::NoteOff,
            other => other,
        };

        Ok(Some(Self {
            kind,
            channel,
            key,
            value,
        }))
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.kind, self.channel, self.key, self.value
        )
    }
}

/// A message received on a named input port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiEvent {
    /// Configured name of the input port the message arrived on
    pub port: Arc<str>,
    pub message: MidiMessage,
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.port, self.message)
    }
}

/// Port direction, for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Pick the port matching `wanted` from a list of available names
///
/// Exact matches win; otherwise the first name containing `wanted` is used,
/// since ALSA decorates client names with port numbers.
pub fn match_port_name<'a>(available: &'a [String], wanted: &str) -> Option<&'a str> {
    available
        .iter()
        .find(|name| name.as_str() == wanted)
        .or_else(|| available.iter().find(|name| name.contains(wanted)))
        .map(String::as_str)
}
