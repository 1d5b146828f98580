//! mx4hyprland Library
//!
//! Public API for testing and integration.

pub mod config;
pub mod dispatch;
pub mod hidpp;
pub mod hyprland;
pub mod ipc;
pub mod locator;
pub mod session;

/// Re-export commonly used types
pub use config::{AppConfig, ConfigError, DaemonConfig, EventBinding, SharedConfig, load_shared_config};
pub use dispatch::{DispatchStats, EnqueueOutcome, HapticHandle, HapticManager, DEFAULT_QUEUE_CAPACITY};
pub use hidpp::{ConnectionType, EffectId, HidppCommand, HidppResponse, ProtocolError};
pub use hyprland::HyprlandListener;
pub use ipc::IpcServer;
pub use locator::{DeviceCandidate, DeviceLocator, Locator};
pub use session::{DeviceError, DeviceSession, HapticDevice, HidTransport, SendOutcome, SessionState};
