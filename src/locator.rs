//! MX Master 4 discovery over sysfs
//!
//! Both connection types are found by scanning `/sys/class/hidraw`; nothing
//! is opened during discovery.
//!
//! ## Bolt receiver
//! A hidraw node on the USB bus with the Logitech vendor ID whose report
//! descriptor declares the HID++ vendor usage page (0xFF00). The parent USB
//! interface number becomes the session's transport index.
//!
//! ## Bluetooth
//! A hidraw node whose input device name contains "MX Master 4" and whose
//! `HID_ID` carries the Bluetooth bus with the MX Master 4 IDs. The kernel
//! formats these IDs either zero-padded (`0005:0000046D:0000B042`) or
//! unpadded (`0005:046D:B042`) depending on version; both are accepted.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hidpp::{product_ids, ConnectionType, HIDPP_USAGE_PAGE, LOGITECH_VENDOR_ID, MX_MASTER_4_NAME};
use crate::session::{DeviceSession, HapticDevice, DEFAULT_RESPONSE_TIMEOUT};

/// sysfs class directory listing hidraw nodes
pub const SYSFS_HIDRAW_DIR: &str = "/sys/class/hidraw";

/// Directory holding the hidraw character devices
pub const DEV_DIR: &str = "/dev";

/// HID bus types as they appear in `HID_ID`
const BUS_USB: u32 = 0x0003;
const BUS_BLUETOOTH: u32 = 0x0005;

/// Finds a device to talk to; the dispatch queue's view of discovery
pub trait DeviceLocator: Send + 'static {
    type Device: HapticDevice;

    /// Look for a device, preferring `preferred` when given
    ///
    /// `None` is an empty result, not an error.
    fn find(&mut self, preferred: Option<ConnectionType>) -> Option<Self::Device>;
}

/// A discovered hidraw node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Connection type the node was matched as
    pub connection: ConnectionType,
    /// Character device path (e.g. `/dev/hidraw3`)
    pub path: PathBuf,
    /// Name reported by the kernel
    pub name: String,
    /// USB interface number; Bolt only
    pub transport_index: Option<u8>,
}

/// sysfs scanner for Bolt and Bluetooth nodes
#[derive(Debug, Clone)]
pub struct Locator {
    sysfs_dir: PathBuf,
    dev_dir: PathBuf,
    /// Explicit Bluetooth node, bypassing the scan
    bluetooth_path: Option<PathBuf>,
    response_timeout: Duration,
}

impl Default for Locator {
    fn default() -> Self {
        Self::new()
    }
}

impl Locator {
    /// Scan the real system directories
    pub fn new() -> Self {
        Self::with_roots(SYSFS_HIDRAW_DIR, DEV_DIR)
    }

    /// Scan alternative sysfs/dev roots
    pub fn with_roots(sysfs_dir: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_dir: sysfs_dir.into(),
            dev_dir: dev_dir.into(),
            bluetooth_path: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Use this node for Bluetooth instead of scanning
    pub fn with_bluetooth_path(mut self, path: Option<PathBuf>) -> Self {
        self.bluetooth_path = path;
        self
    }

    /// Response timeout applied to sessions this locator creates
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Find the MX Master 4, Bolt first unless Bluetooth is requested
    pub fn find(&self, preferred: Option<ConnectionType>) -> Option<DeviceSession> {
        let candidate = match preferred {
            Some(ConnectionType::Bolt) => self.find_bolt(),
            Some(ConnectionType::Bluetooth) => self.find_bluetooth(),
            None => self.find_bolt().or_else(|| self.find_bluetooth()),
        };

        match candidate {
            Some(candidate) => {
                tracing::info!(
                    path = %candidate.path.display(),
                    connection = %candidate.connection,
                    name = %candidate.name,
                    "Found MX Master 4"
                );
                Some(self.session_for(candidate))
            }
            None => {
                match preferred {
                    Some(connection) => {
                        tracing::debug!(connection = %connection, "MX Master 4 not found on requested connection")
                    }
                    None => tracing::debug!("MX Master 4 not found on any connection"),
                }
                None
            }
        }
    }

    /// Turn a candidate into an unopened session
    pub fn session_for(&self, candidate: DeviceCandidate) -> DeviceSession {
        DeviceSession::new(candidate.connection, candidate.path, candidate.transport_index)
            .with_response_timeout(self.response_timeout)
    }

    /// First Bolt HID++ node
    pub fn find_bolt(&self) -> Option<DeviceCandidate> {
        self.hidraw_entries()
            .iter()
            .find_map(|entry| self.inspect_bolt(entry))
    }

    /// First Bluetooth MX Master 4 node, or the configured override
    pub fn find_bluetooth(&self) -> Option<DeviceCandidate> {
        if let Some(path) = &self.bluetooth_path {
            if path.exists() {
                return Some(DeviceCandidate {
                    connection: ConnectionType::Bluetooth,
                    path: path.clone(),
                    name: MX_MASTER_4_NAME.to_string(),
                    transport_index: None,
                });
            }
            tracing::warn!(path = %path.display(), "Configured Bluetooth device path does not exist");
            return None;
        }

        self.hidraw_entries()
            .iter()
            .find_map(|entry| self.inspect_bluetooth(entry))
    }

    /// Every matching node on both connection types
    pub fn list(&self) -> Vec<DeviceCandidate> {
        let entries = self.hidraw_entries();
        let bolt = entries.iter().filter_map(|entry| self.inspect_bolt(entry));
        let bluetooth = entries.iter().filter_map(|entry| self.inspect_bluetooth(entry));
        bolt.chain(bluetooth).collect()
    }

    /// hidraw class entries, sorted so "first match" is stable
    fn hidraw_entries(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.sysfs_dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(
                    dir = %self.sysfs_dir.display(),
                    error = %e,
                    "Failed to read hidraw class directory"
                );
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
        paths.sort();
        paths
    }

    fn dev_node(&self, entry: &Path) -> Option<PathBuf> {
        entry.file_name().map(|name| self.dev_dir.join(name))
    }

    fn inspect_bolt(&self, entry: &Path) -> Option<DeviceCandidate> {
        let uevent = fs::read_to_string(entry.join("device/uevent")).ok()?;
        let (bus, vendor, product) = parse_hid_id(uevent_value(&uevent, "HID_ID")?)?;

        if bus != BUS_USB || vendor != u32::from(LOGITECH_VENDOR_ID) {
            return None;
        }

        let descriptor = fs::read(entry.join("device/report_descriptor")).ok()?;
        if !declares_usage_page(&descriptor, HIDPP_USAGE_PAGE) {
            return None;
        }

        let Some(interface) = interface_number(entry) else {
            tracing::debug!(entry = %entry.display(), "HID++ node without USB interface number, skipping");
            return None;
        };

        let name = uevent_value(&uevent, "HID_NAME").unwrap_or("Logitech receiver").to_string();
        let path = self.dev_node(entry)?;

        tracing::debug!(
            path = %path.display(),
            product = %format!("0x{:04X}", product),
            interface,
            name = %name,
            "Found Bolt HID++ interface"
        );

        Some(DeviceCandidate {
            connection: ConnectionType::Bolt,
            path,
            name,
            transport_index: Some(interface),
        })
    }

    fn inspect_bluetooth(&self, entry: &Path) -> Option<DeviceCandidate> {
        let device_dir = entry.join("device");
        let uevent = fs::read_to_string(device_dir.join("uevent")).ok()?;
        let name = input_name(&device_dir)
            .or_else(|| uevent_value(&uevent, "HID_NAME").map(str::to_string))?;

        if !name.contains(MX_MASTER_4_NAME) {
            return None;
        }

        if !hid_id_matches(&uevent, BUS_BLUETOOTH, LOGITECH_VENDOR_ID, product_ids::MX_MASTER_4_BLUETOOTH) {
            tracing::debug!(entry = %entry.display(), name = %name, "Name matches but HID_ID does not");
            return None;
        }

        let path = self.dev_node(entry)?;
        tracing::debug!(path = %path.display(), name = %name, "Found Bluetooth MX Master 4");

        Some(DeviceCandidate {
            connection: ConnectionType::Bluetooth,
            path,
            name,
            transport_index: None,
        })
    }
}

impl DeviceLocator for Locator {
    type Device = DeviceSession;

    fn find(&mut self, preferred: Option<ConnectionType>) -> Option<DeviceSession> {
        Locator::find(self, preferred)
    }
}

// ============================================================================
// sysfs parsing helpers
// ============================================================================

/// Value of `KEY=value` in a uevent file
fn uevent_value<'a>(uevent: &'a str, key: &str) -> Option<&'a str> {
    uevent.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim())
    })
}

/// Parse `HID_ID=BBBB:VVVVVVVV:PPPPPPPP` into (bus, vendor, product)
fn parse_hid_id(value: &str) -> Option<(u32, u32, u32)> {
    let mut parts = value.split(':').map(|part| u32::from_str_radix(part.trim(), 16));
    let bus = parts.next()?.ok()?;
    let vendor = parts.next()?.ok()?;
    let product = parts.next()?.ok()?;
    Some((bus, vendor, product))
}

/// Whether the uevent's HID_ID matches in padded or unpadded hex
fn hid_id_matches(uevent: &str, bus: u32, vendor: u16, product: u16) -> bool {
    let uevent = uevent.to_uppercase();
    let unpadded = format!("HID_ID={:04X}:{:04X}:{:04X}", bus, vendor, product);
    let padded = format!("HID_ID={:04X}:0000{:04X}:0000{:04X}", bus, vendor, product);
    uevent.contains(&unpadded) || uevent.contains(&padded)
}

/// Name of the first `input/input*` child of a HID device
fn input_name(device_dir: &Path) -> Option<String> {
    let mut inputs: Vec<PathBuf> = fs::read_dir(device_dir.join("input"))
        .ok()?
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("input"))
        .map(|entry| entry.path())
        .collect();
    inputs.sort();

    inputs
        .iter()
        .find_map(|input| fs::read_to_string(input.join("name")).ok())
        .map(|name| name.trim().to_string())
}

/// `bInterfaceNumber` of the USB interface owning this hidraw node
fn interface_number(entry: &Path) -> Option<u8> {
    let hid_device = fs::canonicalize(entry.join("device")).ok()?;
    let raw = fs::read_to_string(hid_device.parent()?.join("bInterfaceNumber")).ok()?;
    u8::from_str_radix(raw.trim(), 16).ok()
}

/// Whether a HID report descriptor declares the given usage page
///
/// Walks the descriptor's short items looking for a global Usage Page item;
/// long items are skipped.
pub fn declares_usage_page(descriptor: &[u8], page: u16) -> bool {
    const USAGE_PAGE_TAG: u8 = 0x04;
    const LONG_ITEM_PREFIX: u8 = 0xFE;

    let mut i = 0;
    while i < descriptor.len() {
        let prefix = descriptor[i];

        if prefix == LONG_ITEM_PREFIX {
            let Some(&data_len) = descriptor.get(i + 1) else {
                return false;
            };
            i += 3 + data_len as usize;
            continue;
        }

        let size = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let Some(data) = descriptor.get(i + 1..i + 1 + size) else {
            return false;
        };

        if prefix & 0xFC == USAGE_PAGE_TAG {
            let value = data
                .iter()
                .rev()
                .fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte));
            if value == u32::from(page) {
                return true;
            }
        }

        i += 1 + size;
    }

    false
}

// ============================================================================
// Tests
// ============================================================================
