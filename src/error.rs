//! Engine error types

use std::path::PathBuf;

use stagesavvy_transport::TransportError;
use thiserror::Error;

use crate::binding::BindingError;
use crate::config::ConfigError;

/// Errors that stop the translator from starting
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No mappings defined")]
    NoMappings,

    #[error("Mapping {0} is not defined")]
    UnknownMapping(String),

    #[error("Another instance is already listening on {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("Control socket {}: {source}", .path.display())]
    Socket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
