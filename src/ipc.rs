//! Command socket
//!
//! Any local process can trigger an effect by writing its number to the
//! Unix socket, e.g. `echo 5 | socat - UNIX-CONNECT:$XDG_RUNTIME_DIR/mx4hyprland.sock`.
//! One payload is read per connection.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::StreamExt;

use crate::dispatch::{EnqueueOutcome, HapticHandle};

/// Largest payload read from one connection
pub const MAX_MESSAGE_LEN: usize = 128;

/// Socket file mode: owner only
const SOCKET_MODE: u32 = 0o600;

/// Effect number in a payload: the first whitespace-delimited token
pub fn parse_command(data: &[u8]) -> Option<i64> {
    let text = String::from_utf8_lossy(data);
    text.split_whitespace().next()?.parse().ok()
}

/// Removes the socket file when dropped
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => tracing::debug!(path = %self.0.display(), "Removed IPC socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.0.display(), error = %e, "Failed to remove IPC socket"),
        }
    }
}

/// Unix socket server accepting effect numbers
pub struct IpcServer {
    path: PathBuf,
    haptics: HapticHandle,
}

impl IpcServer {
    pub fn new(path: impl Into<PathBuf>, haptics: HapticHandle) -> Self {
        Self {
            path: path.into(),
            haptics,
        }
    }

    /// Replace any stale socket, bind, and restrict permissions
    fn bind(&self) -> io::Result<(UnixListener, SocketFile)> {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed stale IPC socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(&self.path)?;
        let guard = SocketFile(self.path.clone());
        fs::set_permissions(&self.path, fs::Permissions::from_mode(SOCKET_MODE))?;
        Ok((listener, guard))
    }

    /// Accept connections until shutdown; the socket file is removed on exit
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let (listener, _socket_file) = self.bind()?;
        tracing::info!(path = %self.path.display(), "IPC listening");

        let mut incoming = UnixListenerStream::new(listener);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                conn = incoming.next() => match conn {
                    Some(Ok(stream)) => {
                        let haptics = self.haptics.clone();
                        tokio::spawn(handle_client(stream, haptics));
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "Failed to accept IPC connection"),
                    None => break,
                },
            }
        }

        tracing::info!("IPC server stopped");
        Ok(())
    }
}

async fn handle_client(mut stream: UnixStream, haptics: HapticHandle) -> Option<EnqueueOutcome> {
    let mut buf = [0u8; MAX_MESSAGE_LEN];
    let len = match stream.read(&mut buf).await {
        Ok(len) => len,
        Err(e) => {
            tracing::error!(error = %e, "IPC read failed");
            return None;
        }
    };

    match parse_command(&buf[..len]) {
        Some(effect) => {
            let outcome = haptics.request_effect(effect);
            tracing::debug!(effect, outcome = %outcome, "IPC request");
            Some(outcome)
        }
        None => {
            tracing::debug!("Received unknown IPC command: {:?}", String::from_utf8_lossy(&buf[..len]));
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
