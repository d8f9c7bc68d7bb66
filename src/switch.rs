//! Mapping switch controller
//!
//! The active mapping name is the only state that changes after startup. It
//! lives in a `watch` channel whose sender is owned by a single controller
//! task; everything else requests changes through an mpsc queue and reads
//! snapshots through [`ActiveMapping`].

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Switch target meaning "advance to the next mapping"
pub const NEXT_MAPPING: &str = "MPN";

/// A request to change the active mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchCommand {
    Select(String),
    Next,
}

impl SwitchCommand {
    /// Interpret the target of a `[name]` rule
    pub fn from_target(target: &str) -> Self {
        if target == NEXT_MAPPING {
            SwitchCommand::Next
        } else {
            SwitchCommand::Select(target.to_string())
        }
    }
}

/// Read side of the active mapping
#[derive(Clone, Debug)]
pub struct ActiveMapping {
    rx: watch::Receiver<Arc<str>>,
}

impl ActiveMapping {
    /// Snapshot of the current mapping name
    pub fn current(&self) -> Arc<str> {
        Arc::clone(&self.rx.borrow())
    }

    /// Wait for the next switch and return the new name
    ///
    /// Returns `None` once the controller has stopped.
    pub async fn changed(&mut self) -> Option<Arc<str>> {
        self.rx.changed().await.ok()?;
        Some(Arc::clone(&self.rx.borrow_and_update()))
    }
}

/// Write side: queues requests for the controller
#[derive(Clone, Debug)]
pub struct SwitchHandle {
    tx: mpsc::UnboundedSender<SwitchCommand>,
}

impl SwitchHandle {
    /// Queue a request; false if the controller is gone
    pub fn request(&self, command: SwitchCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

/// Sole writer of the active mapping
pub struct MappingSwitch {
    names: Vec<String>,
    active: watch::Sender<Arc<str>>,
}

impl MappingSwitch {
    /// Create a controller over `names`, starting at `initial`
    pub fn new(names: Vec<String>, initial: &str) -> (Self, ActiveMapping) {
        let (active, rx) = watch::channel(Arc::from(initial));
        (Self { names, active }, ActiveMapping { rx })
    }

    /// Create a controller and spawn its consumer task
    pub fn spawn(names: Vec<String>, initial: &str) -> (SwitchHandle, ActiveMapping, JoinHandle<()>) {
        let (controller, active) = Self::new(names, initial);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(controller.run(rx));
        (SwitchHandle { tx }, active, task)
    }

    /// Apply one request; returns the new mapping name when it was accepted
    pub fn apply(&self, command: SwitchCommand) -> Option<Arc<str>> {
        let old = Arc::clone(&self.active.borrow());

        let new: Arc<str> = match command {
            SwitchCommand::Select(name) => {
                if !self.names.iter().any(|n| *n == name) {
                    warn!("Mapping not found: {}", name);
                    return None;
                }
                Arc::from(name)
            }
            SwitchCommand::Next => Arc::from(next_mapping(&self.names, &old)?),
        };

        self.active.send_replace(Arc::clone(&new));
        info!("Mapping changed from {} to {}", old, new);
        Some(new)
    }

    /// Consume requests until every handle is dropped
    pub async fn run(self, mut requests: mpsc::UnboundedReceiver<SwitchCommand>) {
        while let Some(command) = requests.recv().await {
            self.apply(command);
        }
    }
}

/// The mapping after `current`, wrapping to the first after the last
///
/// An unknown `current` also restarts from the first mapping.
pub fn next_mapping<'a>(names: &'a [String], current: &str) -> Option<&'a str> {
    let position = names.iter().position(|n| n == current);
    let next = match position {
        Some(i) => (i + 1) % names.len(),
        None => 0,
    };
    names.get(next).map(String::as_str)
}
