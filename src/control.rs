//! Local control channel
//!
//! A Unix stream socket accepting short text commands. Every read chunk is
//! handled immediately, one command per line:
//!
//! - `MP<name>`: make mapping `MP<name>` active
//! - `MPN`: advance to the next mapping
//! - `Stop`: shut the translator down
//!
//! Anything else is ignored. The socket doubles as the single-instance lock.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::switch::{SwitchCommand, SwitchHandle, NEXT_MAPPING};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/stagesavvy.sock";

/// Prefix shared by mapping-switch commands and mapping names
const MAPPING_PREFIX: &str = "MP";
const STOP: &str = "Stop";

/// A parsed control-channel command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Switch(SwitchCommand),
    Stop,
}

impl ControlCommand {
    /// Parse one line; `None` for anything unrecognized
    pub fn parse(line: &str) -> Option<Self> {
        let text = line.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if text.starts_with(STOP) {
            Some(ControlCommand::Stop)
        } else if text == NEXT_MAPPING {
            Some(ControlCommand::Switch(SwitchCommand::Next))
        } else if text.starts_with(MAPPING_PREFIX) {
            Some(ControlCommand::Switch(SwitchCommand::Select(text.to_string())))
        } else {
            None
        }
    }
}

/// A bound Unix socket; the socket file is removed on drop
pub struct LocalSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl LocalSocket {
    /// Bind `path`, failing if another process is answering on it
    ///
    /// A leftover socket file nobody listens on is replaced.
    pub async fn bind(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(EngineError::AlreadyRunning(path.to_path_buf()));
            }
            debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path).map_err(|source| EngineError::Socket {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let listener = UnixListener::bind(path).map_err(|source| EngineError::Socket {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }
}

impl Drop for LocalSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Read buffer for one chunk of command text
const CHUNK_SIZE: usize = 1024;

/// Feed every command of `stream` to `handle` until EOF or a read error
///
/// Each read chunk is acted on as soon as it arrives; clients need not
/// terminate a command with a newline. A chunk holding several lines yields
/// one command per non-empty line.
pub(crate) async fn for_each_command(mut stream: UnixStream, mut handle: impl FnMut(&str)) {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                warn!("Control connection read failed: {}", e);
                return;
            }
        };

        let chunk = String::from_utf8_lossy(&buf[..n]);
        for line in chunk.split('\n') {
            let line = line.trim_matches(|c: char| c == '\0' || c.is_whitespace());
            if !line.is_empty() {
                handle(line);
            }
        }
    }
}

/// The translator's control channel
pub struct ControlServer {
    socket: LocalSocket,
}

impl ControlServer {
    pub async fn bind(path: &Path) -> Result<Self, EngineError> {
        let socket = LocalSocket::bind(path).await?;
        info!("Control channel listening on {}", path.display());
        Ok(Self { socket })
    }

    pub fn path(&self) -> &Path {
        self.socket.path()
    }

    /// Accept connections forever, one task each
    ///
    /// Switch commands go to `switch`; `Stop` is signalled on `stop`.
    pub async fn serve(&self, switch: SwitchHandle, stop: mpsc::UnboundedSender<()>) {
        loop {
            let stream = match self.socket.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Control channel accept failed: {}", e);
                    continue;
                }
            };

            let switch = switch.clone();
            let stop = stop.clone();
            tokio::spawn(for_each_command(stream, move |line| {
                match ControlCommand::parse(line) {
                    Some(ControlCommand::Switch(command)) => {
                        info!("Control: {:?}", command);
                        switch.request(command);
                    }
                    Some(ControlCommand::Stop) => {
                        info!("Control: stop requested");
                        let _ = stop.send(());
                    }
                    None => debug!("Control: ignoring {:?}", line),
                }
            }));
        }
    }
}

/// Send one message to a listening control socket
pub async fn send_command(path: &Path, message: &str) -> io::Result<()> {
    let mut stream = UnixStream::connect(path).await?;
    stream.write_all(message.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch::MappingSwitch;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ControlCommand::parse("MP2"),
            Some(ControlCommand::Switch(SwitchCommand::Select("MP2".to_string())))
        );
        assert_eq!(
            ControlCommand::parse("MPN\n"),
            Some(ControlCommand::Switch(SwitchCommand::Next))
        );
        assert_eq!(ControlCommand::parse("Stop"), Some(ControlCommand::Stop));
        assert_eq!(ControlCommand::parse("Stop now"), Some(ControlCommand::Stop));
        assert_eq!(ControlCommand::parse("hello"), None);
        assert_eq!(ControlCommand::parse(""), None);
    }

    #[test]
    fn test_parse_strips_nul_padding() {
        assert_eq!(
            ControlCommand::parse("MP3\0\0\0\0"),
            Some(ControlCommand::Switch(SwitchCommand::Select("MP3".to_string())))
        );
        assert_eq!(ControlCommand::parse("  Stop\r"), Some(ControlCommand::Stop));
    }

    #[tokio::test]
    async fn test_second_bind_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");

        let first = LocalSocket::bind(&path).await.unwrap();
        assert!(matches!(
            LocalSocket::bind(&path).await,
            Err(EngineError::AlreadyRunning(_))
        ));

        drop(first);
        assert!(!path.exists());
        let _again = LocalSocket::bind(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_socket_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        // A bound std listener that is dropped leaves its file behind
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let _socket = LocalSocket::bind(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_switches_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let server = ControlServer::bind(&path).await.unwrap();

        let names = vec!["MP1".to_string(), "MP2".to_string()];
        let (switch, mut active, _task) = MappingSwitch::spawn(names, "MP1");
        let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move { server.serve(switch, stop_tx).await });

        send_command(&path, "MP2").await.unwrap();
        assert_eq!(active.changed().await.as_deref(), Some("MP2"));

        send_command(&path, "MPN").await.unwrap();
        assert_eq!(active.changed().await.as_deref(), Some("MP1"));

        send_command(&path, "Stop").await.unwrap();
        assert_eq!(stop_rx.recv().await, Some(()));
    }

    #[tokio::test]
    async fn test_unterminated_chunks_on_open_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let server = ControlServer::bind(&path).await.unwrap();

        let names = vec!["MP1".to_string(), "MP2".to_string(), "MP3".to_string()];
        let (switch, mut active, _task) = MappingSwitch::spawn(names, "MP1");
        let (stop_tx, _stop_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move { server.serve(switch, stop_tx).await });

        // One connection held open, commands written without newlines
        let mut client = UnixStream::connect(&path).await.unwrap();
        let wait = std::time::Duration::from_secs(2);

        client.write_all(b"MP2").await.unwrap();
        let changed = tokio::time::timeout(wait, active.changed()).await.unwrap();
        assert_eq!(changed.as_deref(), Some("MP2"));

        client.write_all(b"MPN\0\0").await.unwrap();
        let changed = tokio::time::timeout(wait, active.changed()).await.unwrap();
        assert_eq!(changed.as_deref(), Some("MP3"));
    }
}
