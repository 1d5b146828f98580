//! Device session: one hidraw handle to the MX Master 4
//!
//! A session is produced by the locator with no handle open. `open()`
//! acquires the handle, `play()` sends one haptic command, `close()`
//! releases it. Once a disconnect has been observed the session is
//! terminal and refuses further I/O; the dispatch queue must discard it and
//! ask the locator for a fresh one.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::hidpp::{self, ConnectionType, EffectId, HidppResponse, ProtocolError, LONG_REPORT_LEN};

/// Default wait for the Bolt receiver's answer frame
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Poll interval while waiting on a non-blocking read
const READ_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// OS error codes meaning the device node is gone
fn is_device_gone(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENODEV) | Some(libc::ENXIO))
}

// ============================================================================
// Transport
// ============================================================================

/// Raw report I/O on an open device handle
pub trait HidTransport: Send {
    /// Write one complete report
    fn write_report(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read one report, waiting at most `timeout`
    ///
    /// Returns `ErrorKind::TimedOut` when nothing arrives in time.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Discard reports already waiting to be read; returns how many were dropped
    fn discard_pending(&mut self) -> usize {
        0
    }

    /// Release the handle, reporting the OS result of the close
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// hidraw character device opened with `O_NONBLOCK`
pub struct HidrawTransport {
    file: File,
}

impl HidrawTransport {
    /// Open a hidraw node for the given connection type
    ///
    /// Bolt is opened read/write (it answers every command); Bluetooth is
    /// opened write-only.
    pub fn open(connection: ConnectionType, path: &Path) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        match connection {
            ConnectionType::Bolt => options.read(true).write(true),
            ConnectionType::Bluetooth => options.write(true),
        };

        let file = options.custom_flags(libc::O_NONBLOCK).open(path)?;
        Ok(Self { file })
    }
}

impl HidTransport for HidrawTransport {
    fn write_report(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.file.flush()
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.file.read(buf) {
                Ok(len) => return Ok(len),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no HID++ response before timeout",
                ));
            }

            std::thread::sleep(READ_POLL_INTERVAL);
        }
    }

    fn discard_pending(&mut self) -> usize {
        let mut stale = [0u8; LONG_REPORT_LEN];
        let mut discarded = 0;
        loop {
            match self.file.read(&mut stale) {
                Ok(0) => break,
                Ok(_) => discarded += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        discarded
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let fd = self.file.into_raw_fd();
        // SAFETY: `fd` was released by an owned `File` above and is closed exactly once here.
        if unsafe { libc::close(fd) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Bluetooth: frame written, no answer expected
    Written,
    /// Bolt: answer frame carried our device index
    Answered(HidppResponse),
    /// Bolt: another logical device on the same receiver answered instead
    Uncorrelated,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No handle held
    Unopened,
    /// Handle held and usable
    Open,
    /// Device vanished; the session must be discarded
    Terminal,
}

/// Something that can play haptic effects; the dispatch queue's only view of a device
pub trait HapticDevice: Send + 'static {
    /// Connection family of this device
    fn connection_type(&self) -> ConnectionType;

    /// Acquire the handle (no-op when already open)
    fn open(&mut self) -> Result<(), DeviceError>;

    /// Send one validated effect
    fn play(&mut self, effect: EffectId) -> Result<SendOutcome, DeviceError>;

    /// Release the handle (idempotent)
    fn close(&mut self) -> Result<(), DeviceError>;
}

/// One logical connection to the MX Master 4
pub struct DeviceSession {
    connection: ConnectionType,
    path: PathBuf,
    /// Receiver interface/slot; Bolt only
    transport_index: Option<u8>,
    response_timeout: Duration,
    transport: Option<Box<dyn HidTransport>>,
    state: SessionState,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("connection", &self.connection)
            .field("path", &self.path)
            .field("transport_index", &self.transport_index)
            .field("state", &self.state)
            .finish()
    }
}

impl DeviceSession {
    /// Create an unopened session
    pub fn new(connection: ConnectionType, path: impl Into<PathBuf>, transport_index: Option<u8>) -> Self {
        Self {
            connection,
            path: path.into(),
            transport_index,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            transport: None,
            state: SessionState::Unopened,
        }
    }

    /// Create a session around an already-open transport
    pub fn with_transport(
        connection: ConnectionType,
        path: impl Into<PathBuf>,
        transport_index: Option<u8>,
        transport: Box<dyn HidTransport>,
    ) -> Self {
        let mut session = Self::new(connection, path, transport_index);
        session.transport = Some(transport);
        session.state = SessionState::Open;
        session
    }

    /// Override the Bolt answer timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn transport_index(&self) -> Option<u8> {
        self.transport_index
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Acquire the hidraw handle
    ///
    /// Permission failures are reported distinctly and never retried here;
    /// the operator has to fix udev rules or group membership.
    pub fn open(&mut self) -> Result<(), DeviceError> {
        match self.state {
            SessionState::Open => return Ok(()),
            SessionState::Terminal => return Err(DeviceError::invalidated()),
            SessionState::Unopened => {}
        }

        let transport = HidrawTransport::open(self.connection, &self.path)
            .map_err(|e| classify_open_error(e, &self.path))?;

        self.transport = Some(Box::new(transport));
        self.state = SessionState::Open;
        tracing::info!(
            path = %self.path.display(),
            connection = %self.connection,
            "Connected to MX Master 4"
        );
        Ok(())
    }

    /// Release the handle
    ///
    /// A close failing with "no such device" is expected after an unplug and
    /// is swallowed; any other close failure is returned.
    pub fn close(&mut self) -> Result<(), DeviceError> {
        if self.state == SessionState::Open {
            self.state = SessionState::Unopened;
        }

        let Some(transport) = self.transport.take() else {
            return Ok(());
        };

        match transport.close() {
            Ok(()) => Ok(()),
            Err(e) if is_device_gone(&e) => {
                tracing::debug!(path = %self.path.display(), "Device already gone on close");
                Ok(())
            }
            Err(e) => Err(DeviceError::Transport(e)),
        }
    }

    /// Validate a raw effect number and play it
    pub fn send_effect(&mut self, effect_id: i64) -> Result<SendOutcome, DeviceError> {
        let effect = EffectId::new(effect_id)?;
        self.play(effect)
    }

    /// Play a validated effect
    pub fn play(&mut self, effect: EffectId) -> Result<SendOutcome, DeviceError> {
        match self.state {
            SessionState::Open => {}
            SessionState::Terminal => return Err(DeviceError::invalidated()),
            SessionState::Unopened => return Err(DeviceError::NotOpen),
        }

        let command = hidpp::encode_haptic_trigger(self.connection, self.transport_index, effect);
        let timeout = self.response_timeout;
        let expected_index = self.transport_index.unwrap_or(0);
        let transport = self.transport.as_mut().ok_or(DeviceError::NotOpen)?;

        let result = match self.connection {
            ConnectionType::Bolt => {
                bolt_roundtrip(transport.as_mut(), command.as_bytes(), expected_index, timeout)
            }
            ConnectionType::Bluetooth => bluetooth_write(transport.as_mut(), command.as_bytes()),
        };

        if let Err(DeviceError::Disconnected(e)) = &result {
            tracing::warn!(path = %self.path.display(), error = %e, "Haptic device disconnected");
            self.invalidate();
        }

        result
    }

    /// Drop the handle after a disconnect; the session is unusable afterwards
    fn invalidate(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                tracing::trace!(error = %e, "Ignoring close error on vanished device");
            }
        }
        self.state = SessionState::Terminal;
    }
}

impl HapticDevice for DeviceSession {
    fn connection_type(&self) -> ConnectionType {
        self.connection
    }

    fn open(&mut self) -> Result<(), DeviceError> {
        DeviceSession::open(self)
    }

    fn play(&mut self, effect: EffectId) -> Result<SendOutcome, DeviceError> {
        DeviceSession::play(self, effect)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        DeviceSession::close(self)
    }
}

/// Map a failed hidraw open onto the session's error kinds
///
/// Permission problems are reported on their own; a node that vanished
/// between discovery and open counts as a disconnect.
fn classify_open_error(e: io::Error, path: &Path) -> DeviceError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        tracing::error!(
            path = %path.display(),
            "Permission denied opening hidraw device. Run with sudo or install the udev rules."
        );
        DeviceError::PermissionDenied { path: path.to_path_buf() }
    } else if e.kind() == io::ErrorKind::NotFound || is_device_gone(&e) {
        DeviceError::Disconnected(e)
    } else {
        tracing::error!(path = %path.display(), error = %e, "Failed to open hidraw device");
        DeviceError::Transport(e)
    }
}

/// Write a command and read the single answer frame
///
/// Stale reports are drained first so the answer read belongs to this
/// request. Every transport failure on this path means the receiver link
/// is gone.
fn bolt_roundtrip(
    transport: &mut dyn HidTransport,
    command: &[u8],
    expected_index: u8,
    timeout: Duration,
) -> Result<SendOutcome, DeviceError> {
    let discarded = transport.discard_pending();
    if discarded > 0 {
        tracing::debug!(discarded, "Dropped stale HID++ reports");
    }

    tracing::debug!("Writing to Bolt (HID++): {:02X?}", command);
    transport.write_report(command).map_err(DeviceError::Disconnected)?;

    let mut frame = [0u8; LONG_REPORT_LEN];
    let len = transport
        .read_report(&mut frame, timeout)
        .map_err(DeviceError::Disconnected)?;

    let response = hidpp::decode_response(&frame[..len])?;
    if response.device_index != expected_index {
        tracing::debug!(
            expected = expected_index,
            got = response.device_index,
            "HID++ answer belongs to another device index"
        );
        return Ok(SendOutcome::Uncorrelated);
    }

    Ok(SendOutcome::Answered(response))
}

/// Write a command to the write-only Bluetooth node
fn bluetooth_write(transport: &mut dyn HidTransport, command: &[u8]) -> Result<SendOutcome, DeviceError> {
    tracing::debug!("Writing to Bluetooth: {:02X?}", command);
    match transport.write_report(command) {
        Ok(()) => Ok(SendOutcome::Written),
        Err(e) if is_device_gone(&e) => Err(DeviceError::Disconnected(e)),
        Err(e) => Err(DeviceError::Transport(e)),
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Device error type
#[derive(Debug)]
pub enum DeviceError {
    /// No candidate device on the requested transport(s)
    NotFound,
    /// Opening the handle was refused by the OS
    PermissionDenied { path: PathBuf },
    /// The device vanished (unplug, sleep, timeout)
    Disconnected(io::Error),
    /// Answer frame shorter than the HID++ header
    Malformed { len: usize },
    /// Effect outside `0..=15`
    InvalidArgument(i64),
    /// Send attempted without an open handle
    NotOpen,
    /// Any other transport failure
    Transport(io::Error),
}

impl DeviceError {
    fn invalidated() -> Self {
        DeviceError::Disconnected(io::Error::new(
            io::ErrorKind::NotConnected,
            "session was invalidated by an earlier disconnect",
        ))
    }

    /// Whether the dispatch queue must drop the session and rediscover
    pub fn requires_rediscovery(&self) -> bool {
        matches!(
            self,
            DeviceError::Disconnected(_) | DeviceError::Malformed { .. } | DeviceError::NotOpen
        )
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound => write!(f, "MX Master 4 device not found"),
            DeviceError::PermissionDenied { path } => write!(
                f,
                "Permission denied for {}. Run with sudo or check udev rules.",
                path.display()
            ),
            DeviceError::Disconnected(e) => write!(f, "Device disconnected: {}", e),
            DeviceError::Malformed { len } => write!(f, "Malformed HID++ response ({} bytes)", len),
            DeviceError::InvalidArgument(value) => write!(
                f,
                "Effect {} out of range ({}-{})",
                value,
                EffectId::MIN,
                EffectId::MAX
            ),
            DeviceError::NotOpen => write!(f, "Device is not open"),
            DeviceError::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::Disconnected(e) | DeviceError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for DeviceError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Malformed { len } => DeviceError::Malformed { len },
            ProtocolError::EffectOutOfRange(value) => DeviceError::InvalidArgument(value),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
