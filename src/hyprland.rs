//! Hyprland event listener
//!
//! Connects to the compositor's event socket
//! (`$XDG_RUNTIME_DIR/hypr/$HYPRLAND_INSTANCE_SIGNATURE/.socket2.sock`),
//! reads `EVENT>>ARGS` lines, resolves each event to an effect through the
//! shared config and queues it.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::config::{runtime_dir, SharedConfig};
use crate::dispatch::{EnqueueOutcome, HapticHandle};

/// Environment variable naming the running Hyprland instance
pub const INSTANCE_SIGNATURE_ENV: &str = "HYPRLAND_INSTANCE_SIGNATURE";

/// Events that repeat with identical arguments and are only forwarded on change
pub const DEDUP_EVENTS: [&str; 4] = ["workspace", "activewindow", "focusedmon", "activewindowv2"];

/// Retry delay when the socket is missing or refuses connections
const UNREACHABLE_RETRY: Duration = Duration::from_secs(3);

/// Retry delay after the stream closes or fails
const CLOSED_RETRY: Duration = Duration::from_secs(1);

/// One parsed socket2 record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyprlandEvent {
    pub name: String,
    pub args: String,
}

/// Parse `EVENT>>ARGS`; lines without `>>` are not events
pub fn parse_event(line: &str) -> Option<HyprlandEvent> {
    let (name, args) = line.trim().split_once(">>")?;
    Some(HyprlandEvent {
        name: name.to_string(),
        args: args.to_string(),
    })
}

/// socket2 path for an instance signature
pub fn socket_path(runtime_dir: &Path, signature: &str) -> PathBuf {
    runtime_dir.join("hypr").join(signature).join(".socket2.sock")
}

/// Last-seen arguments of the high-frequency events
#[derive(Debug, Default)]
pub struct EventDeduplicator {
    last_args: HashMap<String, String>,
}

impl EventDeduplicator {
    /// Whether this event repeats the previous arguments; records them otherwise
    pub fn is_repeat(&mut self, event: &HyprlandEvent) -> bool {
        if !DEDUP_EVENTS.contains(&event.name.as_str()) {
            return false;
        }

        if self.last_args.get(&event.name) == Some(&event.args) {
            return true;
        }
        self.last_args.insert(event.name.clone(), event.args.clone());
        false
    }
}

/// Hyprland socket2 client feeding the haptic queue
pub struct HyprlandListener {
    socket: PathBuf,
    config: SharedConfig,
    haptics: HapticHandle,
    dedup: EventDeduplicator,
}

impl HyprlandListener {
    pub fn new(socket: impl Into<PathBuf>, config: SharedConfig, haptics: HapticHandle) -> Self {
        Self {
            socket: socket.into(),
            config,
            haptics,
            dedup: EventDeduplicator::default(),
        }
    }

    /// Build from the environment; `None` when Hyprland is not running
    pub fn from_env(config: SharedConfig, haptics: HapticHandle) -> Option<Self> {
        match std::env::var(INSTANCE_SIGNATURE_ENV) {
            Ok(signature) if !signature.is_empty() => {
                Some(Self::new(socket_path(&runtime_dir(), &signature), config, haptics))
            }
            _ => {
                tracing::error!("{} not set, Hyprland listener disabled", INSTANCE_SIGNATURE_ENV);
                None
            }
        }
    }

    /// Process one raw line; returns the queue outcome when an effect was requested
    pub fn handle_line(&mut self, line: &str) -> Option<EnqueueOutcome> {
        let event = parse_event(line)?;

        if self.dedup.is_repeat(&event) {
            tracing::trace!(event = %event.name, "Skipping repeated event");
            return None;
        }

        let effect = {
            let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
            config.get_effect(&event.name, &event.args)
        }?;

        tracing::debug!(event = %event.name, args = %event.args, effect, "Hyprland event");
        Some(self.haptics.request_effect(effect))
    }

    /// Connect, read and reconnect until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(socket = %self.socket.display(), "Hyprland listener starting");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let delay = tokio::select! {
                _ = shutdown.changed() => break,
                delay = self.read_session() => delay,
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(delay) => {}
            }
        }

        tracing::info!("Hyprland listener stopped");
    }

    /// One connection's lifetime; returns the delay before reconnecting
    async fn read_session(&mut self) -> Duration {
        let stream = match UnixStream::connect(&self.socket).await {
            Ok(stream) => stream,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused) => {
                tracing::warn!("Hyprland socket unreachable, retrying in {}s...", UNREACHABLE_RETRY.as_secs());
                return UNREACHABLE_RETRY;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to Hyprland socket");
                return CLOSED_RETRY;
            }
        };

        tracing::info!("Connected to Hyprland socket2");
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    tracing::warn!("Hyprland connection closed, reconnecting...");
                    return CLOSED_RETRY;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    self.handle_line(&line);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Hyprland socket read failed");
                    return CLOSED_RETRY;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::dispatch::HapticManager;
    use crate::locator::Locator;
    use std::sync::{Arc, RwLock};
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;

    fn shared(json: &str) -> SharedConfig {
        Arc::new(RwLock::new(serde_json::from_str::<AppConfig>(json).unwrap()))
    }

    fn manager() -> HapticManager<Locator> {
        HapticManager::new(Locator::with_roots("/nonexistent/hidraw", "/nonexistent/dev"), 10)
    }

    #[test]
    fn test_parse_event() {
        assert_eq!(
            parse_event("workspace>>2\n"),
            Some(HyprlandEvent { name: "workspace".into(), args: "2".into() })
        );
        // Only the first separator splits
        assert_eq!(parse_event("activewindow>>kitty,a>>b").unwrap().args, "kitty,a>>b");
        assert_eq!(parse_event("configreloaded>>").unwrap().args, "");
        assert_eq!(parse_event("garbage"), None);
    }

    #[test]
    fn test_dedup_only_listed_events() {
        let mut dedup = EventDeduplicator::default();
        let ws1 = parse_event("workspace>>1").unwrap();
        let ws2 = parse_event("workspace>>2").unwrap();
        let open = parse_event("openwindow>>abc").unwrap();

        assert!(!dedup.is_repeat(&ws1));
        assert!(dedup.is_repeat(&ws1));
        assert!(!dedup.is_repeat(&ws2));
        assert!(!dedup.is_repeat(&ws1));

        assert!(!dedup.is_repeat(&open));
        assert!(!dedup.is_repeat(&open));
    }

    #[test]
    fn test_socket_path() {
        let path = socket_path(Path::new("/run/user/1000"), "abc_123");
        assert_eq!(path, PathBuf::from("/run/user/1000/hypr/abc_123/.socket2.sock"));
    }

    #[tokio::test]
    async fn test_handle_line_resolves_and_queues() {
        let manager = manager();
        let config = shared(r#"{"events": {"workspace": {"args": {"1": 3}}, "urgent": 99}}"#);
        let mut listener = HyprlandListener::new("/nonexistent.sock", config, manager.handle());

        assert_eq!(listener.handle_line("workspace>>1"), Some(EnqueueOutcome::Accepted));
        // Repeated args are skipped
        assert_eq!(listener.handle_line("workspace>>1"), None);
        // No binding and no default effect
        assert_eq!(listener.handle_line("workspace>>2"), None);
        assert_eq!(listener.handle_line("openwindow>>x"), None);
        // Bound but out of range
        assert_eq!(listener.handle_line("urgent>>x"), Some(EnqueueOutcome::Rejected));
        assert_eq!(listener.handle_line("not an event"), None);

        assert_eq!(manager.handle().queue_len(), 1);
    }

    #[tokio::test]
    async fn test_config_changes_are_seen() {
        let manager = manager();
        let config = shared("{}");
        let mut listener = HyprlandListener::new("/nonexistent.sock", config.clone(), manager.handle());

        assert_eq!(listener.handle_line("openwindow>>x"), None);
        config.write().unwrap().default_effect = Some(4);
        assert_eq!(listener.handle_line("openwindow>>x"), Some(EnqueueOutcome::Accepted));
    }

    #[tokio::test]
    async fn test_run_reads_socket_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".socket2.sock");
        let server = UnixListener::bind(&path).unwrap();

        let manager = manager();
        let handle = manager.handle();
        let config = shared(r#"{"default_effect": 1}"#);
        let listener = HyprlandListener::new(&path, config, manager.handle());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(listener.run(shutdown_rx));

        let (mut client, _) = server.accept().await.unwrap();
        client
            .write_all(b"workspace>>1\nworkspace>>1\nopenwindow>>abc\nnoise\n")
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.stats().accepted < 2 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handle.queue_len(), 2);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_while_waiting_to_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager();
        let listener = HyprlandListener::new(dir.path().join("missing.sock"), shared("{}"), manager.handle());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(listener.run(shutdown_rx));
        sleep(Duration::from_millis(20)).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
