//! In-memory MIDI backend
//!
//! Inputs can be plugged, unplugged and fed messages; outputs record every
//! message sent to them with a tokio timestamp. Used by the engine's tests and
//! for running the translator without hardware.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::types::{match_port_name, MidiEvent, MidiMessage, PortDirection};
use crate::{EventSink, InputConnection, MidiBackend, OutputPort};

#[derive(Default)]
struct VirtualInput {
    present: bool,
    listeners: Vec<(u64, Arc<str>, EventSink)>,
}

#[derive(Default)]
struct State {
    inputs: HashMap<String, VirtualInput>,
    outputs: HashMap<String, Arc<VirtualOutput>>,
    next_listener: u64,
}

/// Backend whose ports live entirely in memory
#[derive(Clone, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<State>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an input port (or re-attach an unplugged one)
    pub fn plug(&self, name: &str) {
        let mut state = self.state.lock();
        state.inputs.entry(name.to_string()).or_default().present = true;
    }

    /// Detach an input port; existing listeners stop receiving events
    pub fn unplug(&self, name: &str) {
        let mut state = self.state.lock();
        if let Some(input) = state.inputs.get_mut(name) {
            input.present = false;
            input.listeners.clear();
        }
    }

    /// Deliver a message on an input port to all of its listeners
    ///
    /// Returns how many listeners received it.
    pub fn inject(&self, name: &str, message: MidiMessage) -> usize {
        let state = self.state.lock();
        let Some(input) = state.inputs.get(name).filter(|i| i.present) else {
            return 0;
        };
        input
            .listeners
            .iter()
            .filter(|(_, label, sink)| {
                sink.send(MidiEvent {
                    port: Arc::clone(label),
                    message,
                })
                .is_ok()
            })
            .count()
    }

    /// Number of live listeners on an input port
    pub fn listener_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .inputs
            .get(name)
            .map(|i| i.listeners.len())
            .unwrap_or(0)
    }

    /// Output port previously opened through [`MidiBackend::open_output`]
    pub fn output(&self, name: &str) -> Option<Arc<VirtualOutput>> {
        self.state.lock().outputs.get(name).cloned()
    }

    fn detach_listener(&self, name: &str, id: u64) {
        let mut state = self.state.lock();
        if let Some(input) = state.inputs.get_mut(name) {
            input.listeners.retain(|(listener, _, _)| *listener != id);
        }
    }
}

/// Removes its listener from the backend when dropped
struct ListenerGuard {
    backend: VirtualBackend,
    port: String,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.backend.detach_listener(&self.port, self.id);
    }
}

impl MidiBackend for VirtualBackend {
    fn list_ports(&self, direction: PortDirection) -> Result<Vec<String>, TransportError> {
        let state = self.state.lock();
        let mut names: Vec<String> = match direction {
            PortDirection::Input => state
                .inputs
                .iter()
                .filter(|(_, input)| input.present)
                .map(|(name, _)| name.clone())
                .collect(),
            PortDirection::Output => state.outputs.keys().cloned().collect(),
        };
        names.sort();
        Ok(names)
    }

    fn listen(&self, name: &str, sink: EventSink) -> Result<InputConnection, TransportError> {
        let resolved = self.find_input(name)?;

        let mut state = self.state.lock();
        let id = state.next_listener;
        state.next_listener += 1;

        let label: Arc<str> = Arc::from(name);
        let input = state
            .inputs
            .get_mut(&resolved)
            .ok_or_else(|| TransportError::PortNotFound(name.to_string()))?;
        input.listeners.push((id, Arc::clone(&label), sink));

        let guard = ListenerGuard {
            backend: self.clone(),
            port: resolved,
            id,
        };
        Ok(InputConnection::new(label, guard))
    }

    fn open_output(&self, name: &str) -> Result<Arc<dyn OutputPort>, TransportError> {
        let mut state = self.state.lock();
        let output = state
            .outputs
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(VirtualOutput::new(name)))
            .clone();
        Ok(output)
    }
}

/// A message recorded by a [`VirtualOutput`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub message: MidiMessage,
    pub at: Instant,
}

/// Output port that records what was sent to it
pub struct VirtualOutput {
    name: String,
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<bool>,
}

impl VirtualOutput {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
        }
    }

    /// Everything sent so far, in send order
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Just the messages, without timestamps
    pub fn messages(&self) -> Vec<MidiMessage> {
        self.sent.lock().iter().map(|s| s.message).collect()
    }

    /// Make subsequent sends fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

impl OutputPort for VirtualOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &MidiMessage) -> Result<(), TransportError> {
        if *self.failing.lock() {
            return Err(TransportError::Send {
                port: self.name.clone(),
                reason: "port unavailable".to_string(),
            });
        }
        self.sent.lock().push(SentMessage {
            message: *message,
            at: Instant::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_listen_and_inject() {
        let backend = VirtualBackend::new();
        backend.plug("Pad");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = backend.listen("Pad", tx).unwrap();
        assert_eq!(conn.port(), "Pad");

        let msg = MidiMessage::note_on(0, 36, 100);
        assert_eq!(backend.inject("Pad", msg), 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(&*event.port, "Pad");
        assert_eq!(event.message, msg);
    }

    #[tokio::test]
    async fn test_drop_connection_detaches() {
        let backend = VirtualBackend::new();
        backend.plug("Pad");
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = backend.listen("Pad", tx).unwrap();
        assert_eq!(backend.listener_count("Pad"), 1);
        drop(conn);
        assert_eq!(backend.listener_count("Pad"), 0);
    }

    #[tokio::test]
    async fn test_unplugged_port_not_found() {
        let backend = VirtualBackend::new();
        backend.plug("Pad");
        backend.unplug("Pad");
        assert!(matches!(
            backend.find_input("Pad"),
            Err(TransportError::PortNotFound(_))
        ));
        assert_eq!(backend.inject("Pad", MidiMessage::note_on(0, 1, 1)), 0);
    }

    #[tokio::test]
    async fn test_output_records_and_fails() {
        let backend = VirtualBackend::new();
        let port = backend.open_output("Synth").unwrap();
        port.send(&MidiMessage::control_change(0, 7, 64)).unwrap();

        let recorded = backend.output("Synth").unwrap();
        assert_eq!(
            recorded.messages(),
            vec![MidiMessage::control_change(0, 7, 64)]
        );

        recorded.set_failing(true);
        assert!(port.send(&MidiMessage::note_off(0, 1)).is_err());
        assert_eq!(recorded.sent().len(), 1);
    }
}
