// CLI definitions using clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use stagesavvy::control::DEFAULT_SOCKET_PATH;
use stagesavvy::liveness::DEFAULT_POLL_INTERVAL;
use stagesavvy::sender::{DEFAULT_SENDER_PORT, DEFAULT_SENDER_SOCKET};

#[derive(Parser)]
#[command(name = "stagesavvy")]
#[command(author, version, about = "StageSavvy MIDI translator")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Mapping file (default: ~/.config/stagesavvy/Settings.toml)
    #[arg(long, short, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the translator (default)
    #[command(visible_alias = "serve")]
    Run(RunArgs),

    /// Send a control message to a running translator (MP2, MPN, Stop)
    Ctl {
        /// Message text
        message: String,

        /// Control socket
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,
    },

    /// Validate the mapping file and print what it needs
    Check,

    /// List MIDI ports
    #[command(visible_alias = "list")]
    Ports,

    /// Expose a virtual output driven by text lines on a socket
    Sender {
        /// Sender socket
        #[arg(long, default_value = DEFAULT_SENDER_SOCKET)]
        socket: PathBuf,

        /// Name of the output port to create
        #[arg(long, default_value = DEFAULT_SENDER_PORT)]
        port_name: String,
    },
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Control socket
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Mapping active at startup (default: MP1, else the first one)
    #[arg(long, short)]
    pub mapping: Option<String>,

    /// Seconds between input presence checks
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    pub poll_interval: u64,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET_PATH),
            mapping: None,
            poll_interval: DEFAULT_POLL_INTERVAL.as_secs(),
        }
    }
}
