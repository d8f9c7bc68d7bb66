//! Event dispatch: one loop per input port
//!
//! Each loop pulls events off its port's channel in arrival order, resolves
//! them against the active mapping and sends the result. Sends are
//! fire-and-forget; a failing output only costs that one message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stagesavvy_transport::{
    MessageKind, MidiBackend, MidiEvent, MidiMessage, OutputPort, TransportError,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::binding::{Bindings, DestinationType};
use crate::matcher::{resolve, Resolution, ResolvedAction};
use crate::switch::{ActiveMapping, SwitchHandle};

/// Every destination device, opened once at startup
pub struct OutputRegistry {
    ports: HashMap<String, Arc<dyn OutputPort>>,
}

impl OutputRegistry {
    /// Open all `names`; any failure is fatal
    pub fn open(backend: &dyn MidiBackend, names: &[String]) -> Result<Self, TransportError> {
        let mut ports = HashMap::with_capacity(names.len());
        for name in names {
            let port = backend.open_output(name)?;
            info!("Output port {} ready", name);
            ports.insert(name.clone(), port);
        }
        Ok(Self { ports })
    }

    /// Send to `device`, logging instead of failing
    pub fn send(&self, device: &str, message: &MidiMessage) -> bool {
        let Some(port) = self.ports.get(device) else {
            warn!("No output port named {}", device);
            return false;
        };
        match port.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Send of {} to {} failed: {}", message, device, e);
                false
            }
        }
    }
}

/// Everything a dispatch loop needs, cheap to clone per port
#[derive(Clone)]
pub struct Router {
    bindings: Arc<Bindings>,
    active: ActiveMapping,
    switch: SwitchHandle,
    outputs: Arc<OutputRegistry>,
}

impl Router {
    pub fn new(
        bindings: Arc<Bindings>,
        active: ActiveMapping,
        switch: SwitchHandle,
        outputs: Arc<OutputRegistry>,
    ) -> Self {
        Self {
            bindings,
            active,
            switch,
            outputs,
        }
    }

    /// Handle one incoming event
    ///
    /// Must run inside a tokio runtime: delayed note-offs are spawned as
    /// their own tasks.
    pub fn route(&self, event: &MidiEvent) -> Resolution {
        let mapping = self.active.current();
        let resolution = resolve(&self.bindings, &mapping, event);

        match &resolution {
            Resolution::Ignore => {
                debug!("Message received: {} (no rule in {})", event, mapping);
            }
            Resolution::Switch(command) => {
                info!("Message received: {} -> switch {:?}", event, command);
                if !self.switch.request(command.clone()) {
                    warn!("Mapping switch controller is gone, dropping {:?}", command);
                }
            }
            Resolution::Forward(action) => {
                info!("Message received: {}", event);
                self.forward(action, event.message.kind);
            }
        }

        resolution
    }

    fn forward(&self, action: &ResolvedAction, incoming: MessageKind) {
        let message = match action.kind {
            DestinationType::Cc => {
                MidiMessage::control_change(action.channel, action.key, action.value)
            }
            // An undelayed note destination follows the source's own note-off
            DestinationType::Note if incoming == MessageKind::NoteOff => {
                MidiMessage::note_off(action.channel, action.key)
            }
            DestinationType::Note => {
                MidiMessage::note_on(action.channel, action.key, action.value)
            }
        };

        info!("Message translated: {}.{}", action.device, message);
        self.outputs.send(&action.device, &message);

        if message.kind == MessageKind::NoteOn {
            self.schedule_release(action);
        }
    }

    fn schedule_release(&self, action: &ResolvedAction) {
        let outputs = Arc::clone(&self.outputs);
        let device = action.device.clone();
        let release = MidiMessage::note_off(action.channel, action.key);
        let delay = Duration::from_millis(u64::from(action.delay_ms));

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("Delayed release: {}.{}", device, release);
            outputs.send(&device, &release);
        });
    }
}

/// Dispatch loop for one input port
///
/// Ends when the port's connection is dropped and the channel closes.
pub async fn run_port(router: Router, mut events: mpsc::UnboundedReceiver<MidiEvent>) {
    while let Some(event) = events.recv().await {
        router.route(&event);
    }
}
