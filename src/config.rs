//! Configuration management for mx4hyprland
//!
//! Handles loading, validation, and reload of the JSON configuration file
//! mapping Hyprland events to haptic effects.
//! Configuration is stored at `~/.config/mx4hyprland/config.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::dispatch::DEFAULT_QUEUE_CAPACITY;
use crate::hidpp::{ConnectionType, EffectId};

// ============================================================================
// Constants
// ============================================================================

/// Application name, used for config directory and socket name
pub const APP_NAME: &str = "mx4hyprland";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

/// Default Bolt answer timeout in milliseconds
const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 100;

// ============================================================================
// Event bindings
// ============================================================================

/// Per-argument effect table for one event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTable {
    /// Effect when no argument matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<i64>,

    /// Effect per exact event argument
    #[serde(default)]
    pub args: HashMap<String, i64>,
}

/// Effect binding for one event: a fixed effect or a per-argument table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventBinding {
    Effect(i64),
    Table(EventTable),
}

// ============================================================================
// Daemon Configuration
// ============================================================================

/// Runtime settings for the daemon itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Effects buffered ahead of the device before new ones are dropped
    pub queue_capacity: usize,

    /// Wait for the Bolt receiver's answer, in milliseconds
    pub response_timeout_ms: u64,

    /// Preferred connection; `None` tries Bolt then Bluetooth
    pub connection: Option<ConnectionType>,

    /// Command socket path override
    pub ipc_socket: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            connection: None,
            ipc_socket: None,
        }
    }
}

impl DaemonConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Command socket path: the override, or `$XDG_RUNTIME_DIR/mx4hyprland.sock`
    pub fn ipc_socket_path(&self) -> PathBuf {
        self.ipc_socket
            .clone()
            .unwrap_or_else(|| runtime_dir().join(format!("{}.sock", APP_NAME)))
    }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Effect for events with no binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_effect: Option<i64>,

    /// Hyprland event name to effect binding
    #[serde(default)]
    pub events: HashMap<String, EventBinding>,

    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Configuration file path (not serialized)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl AppConfig {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Files tried in order: the explicit path alone, or the user config
    /// followed by `./config.json`
    pub fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => Self::default_config_path()
                .into_iter()
                .chain(std::iter::once(PathBuf::from(CONFIG_FILE)))
                .collect(),
        }
    }

    /// Load the first usable candidate, falling back to defaults
    ///
    /// Unreadable or invalid files are logged and skipped.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        for path in Self::candidate_paths(explicit) {
            if !path.exists() {
                tracing::debug!(path = %path.display(), "Config file not found");
                continue;
            }

            match Self::load(&path) {
                Ok(config) => return config,
                Err(e) => tracing::error!(path = %path.display(), "Failed to load config: {}", e),
            }
        }

        tracing::warn!("No config found, using defaults");
        Self::default()
    }

    /// Load configuration from file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: AppConfig =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;

        config.validate()?;
        config.config_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            events = config.events.len(),
            default_effect = ?config.default_effect,
            queue_capacity = config.daemon.queue_capacity,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Reject settings the daemon cannot run with
    ///
    /// Out-of-range effects are only warned about; they are rejected at
    /// request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "daemon.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.daemon.response_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "daemon.response_timeout_ms must be at least 1".to_string(),
            ));
        }

        for (event, effect) in self.bound_effects() {
            if EffectId::new(effect).is_err() {
                tracing::warn!(event = %event, effect, "Configured effect is outside 0-15 and will be ignored");
            }
        }

        Ok(())
    }

    fn bound_effects(&self) -> impl Iterator<Item = (&str, i64)> {
        let default: Option<(&str, i64)> = self.default_effect.map(|e| ("default_effect", e));
        let events = self.events.iter().flat_map(|(name, binding)| {
            let effects: Vec<i64> = match binding {
                EventBinding::Effect(effect) => vec![*effect],
                EventBinding::Table(table) => table.default.into_iter().chain(table.args.values().copied()).collect(),
            };
            effects.into_iter().map(move |effect| (name.as_str(), effect))
        });
        default.into_iter().chain(events)
    }

    /// Effect for an event and its argument string
    ///
    /// Unknown events use `default_effect`. A table binding looks up the
    /// exact argument, then the table's `default`, then `default_effect`.
    pub fn get_effect(&self, event: &str, args: &str) -> Option<i64> {
        match self.events.get(event) {
            None => self.default_effect,
            Some(EventBinding::Effect(effect)) => Some(*effect),
            Some(EventBinding::Table(table)) => table
                .args
                .get(args)
                .copied()
                .or(table.default)
                .or(self.default_effect),
        }
    }
}

/// `$XDG_RUNTIME_DIR`, or the system temp dir when unset
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
}

// ============================================================================
// Shared Config (for reload)
// ============================================================================

/// Thread-safe shared configuration for reload support
pub type SharedConfig = Arc<RwLock<AppConfig>>;

/// Create a new shared config from the candidate files
pub fn load_shared_config(explicit: Option<&Path>) -> SharedConfig {
    Arc::new(RwLock::new(AppConfig::load_or_default(explicit)))
}

/// Re-read configuration into an existing shared config
pub fn reload_shared_config(shared: &SharedConfig, explicit: Option<&Path>) {
    let config = AppConfig::load_or_default(explicit);
    match shared.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => {
            tracing::warn!("Config lock poisoned, replacing contents");
            *poisoned.into_inner() = config;
        }
    }
    tracing::info!("Configuration reloaded");
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading the file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// Validation error
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::ValidationError(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
