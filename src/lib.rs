//! StageSavvy: a MIDI translator daemon
//!
//! Events from controller inputs are matched against the active mapping
//! (a named binding table loaded from TOML) and forwarded, rewritten, to
//! output ports. Mappings are switched in-band by dedicated rules or over a
//! local control socket.
//!
//! The hardware side lives in the `stagesavvy-transport` crate; everything
//! here talks to it through [`stagesavvy_transport::MidiBackend`].

pub mod binding;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod matcher;
pub mod sender;
pub mod switch;

pub use binding::{BindingTable, Bindings, Rule};
pub use config::MappingTree;
pub use engine::{Engine, EngineSettings};
pub use error::EngineError;
pub use switch::{ActiveMapping, SwitchCommand, SwitchHandle};
