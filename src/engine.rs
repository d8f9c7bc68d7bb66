//! Engine supervisor
//!
//! Owns the input listeners and ties the pieces together:
//!
//! ```text
//! input port ──▶ dispatch loop ──▶ matcher ──▶ output port
//!                      │                 └──▶ switch controller
//! liveness monitor ──▶ supervisor (reattach on reappear)
//!        ▲                  │
//!        └──── retry ◀──────┘ (reattach failed)
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stagesavvy_transport::{InputConnection, MidiBackend, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::binding::Bindings;
use crate::dispatch::{run_port, OutputRegistry, Router};
use crate::error::EngineError;
use crate::liveness::{LivenessMonitor, PresenceEvent, DEFAULT_POLL_INTERVAL};
use crate::switch::{ActiveMapping, MappingSwitch, SwitchHandle};

/// Mapping selected when nothing else is requested and it exists
pub const DEFAULT_MAPPING: &str = "MP1";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Mapping active at startup
    pub default_mapping: Option<String>,
    /// Input presence polling period
    pub poll_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_mapping: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Pick the startup mapping: the requested one, else `MP1`, else the first
pub fn initial_mapping(bindings: &Bindings, requested: Option<&str>) -> Result<String, EngineError> {
    if let Some(name) = requested {
        if !bindings.contains(name) {
            return Err(EngineError::UnknownMapping(name.to_string()));
        }
        return Ok(name.to_string());
    }
    if bindings.contains(DEFAULT_MAPPING) {
        return Ok(DEFAULT_MAPPING.to_string());
    }
    bindings
        .tables()
        .first()
        .map(|t| t.name().to_string())
        .ok_or(EngineError::NoMappings)
}

/// A running listener; dropping it stops both the connection and its loop
struct PortListener {
    _connection: InputConnection,
    task: JoinHandle<()>,
}

impl Drop for PortListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct Engine {
    backend: Arc<dyn MidiBackend>,
    router: Router,
    inputs: Vec<String>,
    switch: SwitchHandle,
    active: ActiveMapping,
    switch_task: JoinHandle<()>,
    poll_interval: Duration,
}

impl Engine {
    /// Open every output and start the switch controller
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        backend: Arc<dyn MidiBackend>,
        bindings: Bindings,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        if bindings.is_empty() {
            return Err(EngineError::NoMappings);
        }
        let initial = initial_mapping(&bindings, settings.default_mapping.as_deref())?;

        let output_names = bindings.output_ports();
        let outputs = OutputRegistry::open(backend.as_ref(), &output_names)?;
        let inputs = bindings.input_ports();
        info!(
            "{} mappings, {} inputs, {} outputs; active mapping {}",
            bindings.tables().len(),
            inputs.len(),
            output_names.len(),
            initial
        );

        let (switch, active, switch_task) = MappingSwitch::spawn(bindings.names(), &initial);
        let router = Router::new(
            Arc::new(bindings),
            active.clone(),
            switch.clone(),
            Arc::new(outputs),
        );

        Ok(Self {
            backend,
            router,
            inputs,
            switch,
            active,
            switch_task,
            poll_interval: settings.poll_interval,
        })
    }

    /// Handle for queueing mapping switches from outside
    pub fn switch_handle(&self) -> SwitchHandle {
        self.switch.clone()
    }

    pub fn active_mapping(&self) -> ActiveMapping {
        self.active.clone()
    }

    fn attach(&self, name: &str) -> Result<PortListener, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = self.backend.listen(name, tx)?;
        info!("Input port {} opened", name);
        let task = tokio::spawn(run_port(self.router.clone(), rx));
        Ok(PortListener {
            _connection: connection,
            task,
        })
    }

    /// Route events until `shutdown` completes
    ///
    /// Inputs missing at startup are picked up by the liveness monitor once
    /// they appear. Pending delayed releases are abandoned on return.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let mut listeners: HashMap<String, PortListener> = HashMap::new();
        let mut monitor = LivenessMonitor::new(Arc::clone(&self.backend), self.poll_interval);

        for name in &self.inputs {
            match self.attach(name) {
                Ok(listener) => {
                    listeners.insert(name.clone(), listener);
                    monitor.watch(name.as_str(), true);
                }
                Err(e) => {
                    warn!("Input port {} unavailable: {}", name, e);
                    monitor.watch(name.as_str(), false);
                }
            }
        }

        let (presence_tx, mut presence_rx) = mpsc::unbounded_channel();
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let monitor_task = tokio::spawn(monitor.run(presence_tx, retry_rx));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(change) = presence_rx.recv() => match change {
                    PresenceEvent::Appeared(name) => {
                        info!("Input port {} reappeared", name);
                        // Replacing the entry drops any stale listener first
                        listeners.remove(&name);
                        match self.attach(&name) {
                            Ok(listener) => {
                                listeners.insert(name, listener);
                            }
                            Err(e) => {
                                warn!("Reattaching {} failed, retrying on next poll: {}", name, e);
                                let _ = retry_tx.send(name);
                            }
                        }
                    }
                    PresenceEvent::Disappeared(name) => {
                        warn!("Input port {} disappeared", name);
                    }
                },
            }
        }

        monitor_task.abort();
        drop(listeners);
        info!("Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.switch_task.abort();
    }
}
