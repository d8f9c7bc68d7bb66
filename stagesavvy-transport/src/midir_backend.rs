//! Hardware MIDI backend built on midir

use std::sync::Arc;

use midir::{Ignore, MidiInput, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::types::{match_port_name, MidiEvent, MidiMessage, PortDirection};
use crate::{EventSink, InputConnection, MidiBackend, OutputPort};

/// Backend implemented using the `midir` crate.
///
/// Outputs are created as virtual ports on Unix so that downstream software
/// can subscribe to them by name; elsewhere an existing port is connected.
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn input_names(input: &MidiInput) -> Vec<String> {
        input
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| {
                input
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Port {index}"))
            })
            .collect()
    }

    fn output_names(output: &MidiOutput) -> Vec<String> {
        output
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| {
                output
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Port {index}"))
            })
            .collect()
    }

    #[cfg(unix)]
    fn connect_output(&self, name: &str) -> Result<MidiOutputConnection, TransportError> {
        use midir::os::unix::VirtualOutput;

        let output = MidiOutput::new(&self.client_name)?;
        output
            .create_virtual(name)
            .map_err(|e| TransportError::Connect {
                port: name.to_string(),
                reason: e.to_string(),
            })
    }

    #[cfg(not(unix))]
    fn connect_output(&self, name: &str) -> Result<MidiOutputConnection, TransportError> {
        let output = MidiOutput::new(&self.client_name)?;
        let names = Self::output_names(&output);
        let resolved = match_port_name(&names, name)
            .ok_or_else(|| TransportError::PortNotFound(name.to_string()))?;
        let index = names
            .iter()
            .position(|n| n == resolved)
            .ok_or_else(|| TransportError::PortNotFound(name.to_string()))?;
        let ports = output.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| TransportError::PortNotFound(name.to_string()))?;
        output
            .connect(port, &self.client_name)
            .map_err(|e| TransportError::Connect {
                port: name.to_string(),
                reason: e.to_string(),
            })
    }
}

impl MidiBackend for MidirBackend {
    fn list_ports(&self, direction: PortDirection) -> Result<Vec<String>, TransportError> {
        match direction {
            PortDirection::Input => {
                let input = MidiInput::new(&self.client_name)?;
                Ok(Self::input_names(&input))
            }
            PortDirection::Output => {
                let output = MidiOutput::new(&self.client_name)?;
                Ok(Self::output_names(&output))
            }
        }
    }

    fn listen(&self, name: &str, sink: EventSink) -> Result<InputConnection, TransportError> {
        let mut input = MidiInput::new(&self.client_name)?;
        input.ignore(Ignore::All);

        let names = Self::input_names(&input);
        let resolved = match_port_name(&names, name)
            .ok_or_else(|| TransportError::PortNotFound(name.to_string()))?;
        let index = names
            .iter()
            .position(|n| n == resolved)
            .ok_or_else(|| TransportError::PortNotFound(name.to_string()))?;
        let ports = input.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| TransportError::PortNotFound(name.to_string()))?;

        let label: Arc<str> = Arc::from(name);
        let callback_label = Arc::clone(&label);
        let connection = input
            .connect(
                port,
                &format!("{}-in", self.client_name),
                move |_timestamp, bytes, _| match MidiMessage::from_bytes(bytes) {
                    Ok(Some(message)) => {
                        let _ = sink.send(MidiEvent {
                            port: Arc::clone(&callback_label),
                            message,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Dropping MIDI input on {}: {}", callback_label, e),
                },
                (),
            )
            .map_err(|e| TransportError::Connect {
                port: name.to_string(),
                reason: e.to_string(),
            })?;

        info!("Listening on input port {} ({})", name, resolved);
        Ok(InputConnection::new(label, connection))
    }

    fn open_output(&self, name: &str) -> Result<Arc<dyn OutputPort>, TransportError> {
        let connection = self.connect_output(name)?;
        info!("Opened output port {}", name);
        Ok(Arc::new(MidirOutput {
            name: name.to_string(),
            connection: Mutex::new(connection),
        }))
    }
}

/// Output handle; sends are serialized by the mutex
struct MidirOutput {
    name: String,
    connection: Mutex<MidiOutputConnection>,
}

impl OutputPort for MidirOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &MidiMessage) -> Result<(), TransportError> {
        self.connection
            .lock()
            .send(&message.to_bytes())
            .map_err(|e| TransportError::Send {
                port: self.name.clone(),
                reason: e.to_string(),
            })
    }
}
