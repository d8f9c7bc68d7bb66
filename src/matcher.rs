//! Rule matching: incoming event + active mapping → what to do

use stagesavvy_transport::{MessageKind, MidiEvent};

use crate::binding::{BindingTable, Bindings, DestinationType, ValueSpec};
use crate::switch::SwitchCommand;

/// A destination with its output value and delay filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub device: String,
    pub kind: DestinationType,
    pub channel: u8,
    pub key: u8,
    pub value: u8,
    pub delay_ms: u16,
}

/// Outcome of matching one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No rule applies; the event is dropped
    Ignore,
    /// The event is consumed by the control plane
    Switch(SwitchCommand),
    Forward(ResolvedAction),
}

/// Resolve `event` against the mapping called `mapping`
///
/// An unknown mapping name resolves nothing.
pub fn resolve(bindings: &Bindings, mapping: &str, event: &MidiEvent) -> Resolution {
    match bindings.get(mapping) {
        Some(table) => resolve_in(table, event),
        None => Resolution::Ignore,
    }
}

/// Resolve `event` against one binding table
///
/// - Note-on events are first checked against switch rules, comparing
///   channel, key and exact value only.
/// - Forwarding rules then match on device, type prefix, channel, key and
///   value. A wildcard value stands down when an exact rule anywhere in the
///   table claims the same `(key, value)`.
/// - The first matching rule wins. For note-off events only an undelayed
///   NOTE destination produces output; delayed notes release on their own.
pub fn resolve_in(table: &BindingTable, event: &MidiEvent) -> Resolution {
    let msg = &event.message;

    if msg.kind == MessageKind::NoteOn {
        let switch = table.switch_rules().find(|(source, _)| {
            source.channel == msg.channel
                && source.key == msg.key
                && source.value == ValueSpec::Exact(msg.value)
        });
        if let Some((_, target)) = switch {
            return Resolution::Switch(SwitchCommand::from_target(target));
        }
    }

    let matched = table.forward_rules().find(|(source, _)| {
        if *source.device != *event.port
            || !source.kind.matches(msg.kind)
            || source.channel != msg.channel
            || source.key != msg.key
        {
            return false;
        }
        match source.value {
            ValueSpec::Exact(value) => value == msg.value,
            ValueSpec::Wildcard => !table.has_exact(msg.key, msg.value),
        }
    });

    let Some((_, dest)) = matched else {
        return Resolution::Ignore;
    };

    let action = ResolvedAction {
        device: dest.device.clone(),
        kind: dest.kind,
        channel: dest.channel,
        key: dest.key,
        value: dest.value.exact().unwrap_or(msg.value),
        delay_ms: dest.delay_ms(),
    };

    if msg.kind == MessageKind::NoteOff
        && (action.kind != DestinationType::Note || action.delay_ms != 0)
    {
        return Resolution::Ignore;
    }

    Resolution::Forward(action)
}
