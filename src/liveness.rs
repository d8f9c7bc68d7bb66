//! Input port presence polling
//!
//! The monitor only reports transitions; reattaching a reader is the
//! engine's decision. A reattach that fails is fed back through the retry
//! channel so the port is reported again on the next poll.

use std::sync::Arc;
use std::time::Duration;

use stagesavvy_transport::MidiBackend;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A presence change of one input port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// The port was missing at the previous check and is back
    Appeared(String),
    /// The port was present at the previous check and is gone
    Disappeared(String),
}

struct WatchedPort {
    name: String,
    missing: bool,
}

pub struct LivenessMonitor {
    backend: Arc<dyn MidiBackend>,
    ports: Vec<WatchedPort>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(backend: Arc<dyn MidiBackend>, interval: Duration) -> Self {
        Self {
            backend,
            ports: Vec::new(),
            interval,
        }
    }

    /// Start tracking `name`, with its presence as last observed
    pub fn watch(&mut self, name: impl Into<String>, present: bool) {
        self.ports.push(WatchedPort {
            name: name.into(),
            missing: !present,
        });
    }

    /// Forget that `name` was seen, so the next check reports it again if present
    pub fn mark_missing(&mut self, name: &str) {
        match self.ports.iter_mut().find(|p| p.name == name) {
            Some(port) => port.missing = true,
            None => debug!("Retry for unwatched port {}", name),
        }
    }

    /// Poll every watched port once
    pub fn check(&mut self) -> Vec<PresenceEvent> {
        let mut events = Vec::new();
        for port in &mut self.ports {
            let present = match self.backend.find_input(&port.name) {
                Ok(_) => true,
                Err(e) => {
                    debug!("Input port {} not found: {}", port.name, e);
                    false
                }
            };

            if present && port.missing {
                events.push(PresenceEvent::Appeared(port.name.clone()));
            } else if !present && !port.missing {
                events.push(PresenceEvent::Disappeared(port.name.clone()));
            }
            port.missing = !present;
        }
        debug!("Liveness check of {} ports: {} changes", self.ports.len(), events.len());
        events
    }

    /// Poll on the interval and forward transitions until the receiver goes away
    ///
    /// Names arriving on `retry` are marked missing and picked up by the
    /// following poll.
    pub async fn run(
        mut self,
        changes: mpsc::UnboundedSender<PresenceEvent>,
        mut retry: mpsc::UnboundedReceiver<String>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for event in self.check() {
                        if changes.send(event).is_err() {
                            return;
                        }
                    }
                }
                Some(name) = retry.recv() => self.mark_missing(&name),
            }
        }
    }
}
