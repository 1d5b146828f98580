//! mx4hyprland Daemon
//!
//! Plays Logitech MX Master 4 haptic effects in response to Hyprland
//! events and to effect numbers written to a local command socket.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mx4hyprland::{
    config::{load_shared_config, reload_shared_config, DaemonConfig, SharedConfig},
    ConnectionType, DeviceError, HapticManager, HyprlandListener, IpcServer, Locator,
};

/// Gap between effects in demo mode
const DEMO_EFFECT_GAP: Duration = Duration::from_secs(2);

/// Log verbosity accepted by `--log-level`
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn level(self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// mx4hyprland - MX Master 4 haptic feedback for Hyprland
#[derive(Parser, Debug)]
#[command(name = "mx4hyprland")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Enable verbose logging (same as --log-level debug)
    #[arg(short, long)]
    verbose: bool,

    /// Only use this connection type (bolt or bluetooth)
    #[arg(long)]
    connection: Option<ConnectionType>,

    /// Bluetooth hidraw node to use instead of scanning
    #[arg(long)]
    device_path: Option<PathBuf>,

    /// List detected MX Master 4 interfaces and exit
    #[arg(long)]
    list_devices: bool,

    /// Play every effect once and exit
    #[arg(long)]
    demo: bool,
}

impl Args {
    fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            self.log_level.level()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("mx4hyprland starting...");

    let shared_config = load_shared_config(args.config.as_deref());
    let daemon = daemon_settings(&shared_config);
    let preferred = args.connection.or(daemon.connection);

    let locator = Locator::new()
        .with_bluetooth_path(args.device_path.clone())
        .with_response_timeout(daemon.response_timeout());

    // Handle --list-devices flag
    if args.list_devices {
        list_devices(&locator);
        return Ok(());
    }

    if args.demo {
        tokio::task::spawn_blocking(move || run_demo(&locator, preferred)).await??;
        return Ok(());
    }

    let mut manager = HapticManager::new(locator.clone(), daemon.queue_capacity)
        .with_preferred_connection(preferred);

    // Initial discovery is optional; the queue rediscovers on the first request
    match locator.find(preferred) {
        Some(mut session) => match session.open() {
            Ok(()) => manager = manager.with_device(session),
            Err(e) => warn!("Haptic device open failed (non-fatal): {}", e),
        },
        None => info!("No MX Master 4 found yet, will retry on first effect"),
    }

    manager.start();
    let haptics = manager.handle();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let hyprland_handle = HyprlandListener::from_env(shared_config.clone(), haptics.clone())
        .map(|listener| tokio::spawn(listener.run(shutdown_rx.clone())));

    let ipc_server = IpcServer::new(daemon.ipc_socket_path(), haptics);
    let ipc_rx = shutdown_rx.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server.run(ipc_rx).await {
            error!("IPC server failed: {}", e);
        }
    });

    info!("mx4hyprland ready");

    wait_for_shutdown(&shared_config, args.config.as_deref()).await?;

    shutdown_tx.send_replace(true);

    if let Some(handle) = hyprland_handle {
        if let Err(e) = handle.await {
            error!("Hyprland listener task panicked: {:?}", e);
        }
    }
    if let Err(e) = ipc_handle.await {
        error!("IPC task panicked: {:?}", e);
    }

    manager.stop().await;
    info!("mx4hyprland stopped");
    Ok(())
}

/// Snapshot of the daemon section, tolerating a poisoned lock
fn daemon_settings(config: &SharedConfig) -> DaemonConfig {
    match config.read() {
        Ok(guard) => guard.daemon.clone(),
        Err(poisoned) => poisoned.into_inner().daemon.clone(),
    }
}

/// Block until SIGINT/SIGTERM, reloading the config on SIGHUP
async fn wait_for_shutdown(config: &SharedConfig, path: Option<&Path>) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting...");
                return Ok(());
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, exiting...");
                return Ok(());
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading configuration");
                reload_shared_config(config, path);
                // Event bindings apply immediately; daemon settings need a restart
            }
        }
    }
}

/// List all detected MX Master 4 interfaces
fn list_devices(locator: &Locator) {
    println!("Scanning for MX Master 4 interfaces...\n");

    let devices = locator.list();

    if devices.is_empty() {
        println!("No MX Master 4 found.");
        println!("\nTroubleshooting:");
        println!("  - Ensure your MX Master 4 is connected");
        println!("  - Check that udev rules are installed");
        println!("  - Verify user has access to /dev/hidraw*");
        return;
    }

    println!("Found {} interface(s):\n", devices.len());

    for (i, device) in devices.iter().enumerate() {
        println!("{}. {} [{}]", i + 1, device.name, device.connection);
        println!("   Path:      {:?}", device.path);
        if let Some(index) = device.transport_index {
            println!("   Interface: {}", index);
        }
        println!();
    }
}

/// Play effects 1-15 with a pause between each, then stop the motor
fn run_demo(locator: &Locator, preferred: Option<ConnectionType>) -> Result<(), DeviceError> {
    let mut session = locator.find(preferred).ok_or(DeviceError::NotFound)?;
    session.open()?;

    for effect in 1..=15 {
        println!("Effect {}", effect);
        session.send_effect(effect)?;
        std::thread::sleep(DEMO_EFFECT_GAP);
    }

    session.send_effect(0)?;
    session.close()
}
