//! HID++ framing for MX Master 4 haptic commands
//!
//! Builds the command frames for both connection types and decodes the
//! receiver's answer frames. Everything here is pure: no I/O, no shared
//! state. The session module owns the device handle.
//!
//! # Frame layout
//!
//! Bolt receiver (HID++ 2.0 framing):
//!
//! ```text
//! [report type][device index][feature id hi][feature id lo][params ...]
//! ```
//!
//! Short reports are 7 bytes (3 parameter bytes), long reports are 20 bytes
//! (16 parameter bytes).
//!
//! Bluetooth (direct hidraw, write-only):
//!
//! ```text
//! [0x11][0xFF][0x0B][0x4E][effect][zero padding to 20 bytes]
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Logitech vendor ID
pub const LOGITECH_VENDOR_ID: u16 = 0x046D;

/// Known product IDs
pub mod product_ids {
    /// MX Master 4 paired directly over Bluetooth
    pub const MX_MASTER_4_BLUETOOTH: u16 = 0xB042;
}

/// Product name reported by the kernel input layer for Bluetooth pairing
pub const MX_MASTER_4_NAME: &str = "MX Master 4";

/// Vendor-defined usage page carrying HID++ traffic
pub const HIDPP_USAGE_PAGE: u16 = 0xFF00;

/// HID++ report types
pub mod report_type {
    /// Short HID++ report (7 bytes)
    pub const SHORT: u8 = 0x10;
    /// Long HID++ report (20 bytes)
    pub const LONG: u8 = 0x11;

    /// Total frame length declared by a report type
    pub fn frame_len(report: u8) -> Option<usize> {
        match report {
            SHORT => Some(super::SHORT_REPORT_LEN),
            LONG => Some(super::LONG_REPORT_LEN),
            _ => None,
        }
    }
}

/// Short report length in bytes
pub const SHORT_REPORT_LEN: usize = 7;

/// Long report length in bytes
pub const LONG_REPORT_LEN: usize = 20;

/// Header bytes preceding the parameters: report type, device index, feature id
pub const HEADER_LEN: usize = 4;

/// Parameter bytes carried by a short report
const SHORT_PARAMS_LEN: usize = SHORT_REPORT_LEN - HEADER_LEN;

/// Parameter bytes carried by a long report
const LONG_PARAMS_LEN: usize = LONG_REPORT_LEN - HEADER_LEN;

/// HID++ feature identifiers used by this daemon
pub mod features {
    /// MX Master 4 haptic motor (runtime only, nothing persists)
    pub const HAPTIC: u16 = 0x0B4E;
}

/// Fixed address of the haptic feature on the Bluetooth transport
const BLUETOOTH_HAPTIC_PREFIX: [u8; 3] = [0xFF, 0x0B, 0x4E];

// ============================================================================
// Connection Type
// ============================================================================

/// Type of connection to the MX Master 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Via Logitech Bolt receiver; answers every command
    Bolt,
    /// Direct Bluetooth pairing; write-only
    Bluetooth,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Bolt => write!(f, "Bolt"),
            ConnectionType::Bluetooth => write!(f, "Bluetooth"),
        }
    }
}

impl FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bolt" => Ok(ConnectionType::Bolt),
            "bluetooth" | "bt" => Ok(ConnectionType::Bluetooth),
            other => Err(format!("unknown connection type '{}' (expected bolt or bluetooth)", other)),
        }
    }
}

// ============================================================================
// Effect IDs
// ============================================================================

/// A validated haptic effect identifier in `0..=15`
///
/// Effect 0 stops the motor; 1-15 select the predefined waveforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u8);

impl EffectId {
    /// Lowest valid effect
    pub const MIN: u8 = 0;
    /// Highest valid effect
    pub const MAX: u8 = 15;
    /// Stop / disable haptics
    pub const STOP: EffectId = EffectId(0);

    /// Validate a raw effect number
    pub fn new(value: i64) -> Result<Self, ProtocolError> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(EffectId(value as u8))
        } else {
            Err(ProtocolError::EffectOutOfRange(value))
        }
    }

    /// Raw byte sent on the wire
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Command Frames
// ============================================================================

/// An encoded command frame, 7 or 20 bytes long
///
/// Built fresh for every send and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidppCommand {
    bytes: [u8; LONG_REPORT_LEN],
    len: usize,
}

impl HidppCommand {
    fn from_parts(report: u8, header: [u8; 3], params: &[u8]) -> Self {
        let len = report_type::frame_len(report).unwrap_or(LONG_REPORT_LEN);
        let mut bytes = [0u8; LONG_REPORT_LEN];
        bytes[0] = report;
        bytes[1..HEADER_LEN].copy_from_slice(&header);

        let param_len = params.len().min(len - HEADER_LEN);
        bytes[HEADER_LEN..HEADER_LEN + param_len].copy_from_slice(&params[..param_len]);

        Self { bytes, len }
    }

    /// Frame bytes as written to the device
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Report type byte (short or long)
    pub fn report_type(&self) -> u8 {
        self.bytes[0]
    }

    /// Total frame length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false for a built frame
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Encode a HID++ feature request for the Bolt receiver
///
/// Parameters shorter than 3 bytes are zero-padded. Up to 3 parameter bytes
/// fit in a short report; anything longer uses a long report and is
/// truncated to 16 bytes.
pub fn encode_feature_request(device_index: u8, feature_id: u16, params: &[u8]) -> HidppCommand {
    let report = if params.len() <= SHORT_PARAMS_LEN {
        report_type::SHORT
    } else {
        report_type::LONG
    };

    let [hi, lo] = feature_id.to_be_bytes();
    let params = &params[..params.len().min(LONG_PARAMS_LEN)];
    HidppCommand::from_parts(report, [device_index, hi, lo], params)
}

/// Encode the "play effect" command for a connection type
///
/// `transport_index` is only meaningful for [`ConnectionType::Bolt`]; a
/// missing index addresses slot 0.
pub fn encode_haptic_trigger(
    connection: ConnectionType,
    transport_index: Option<u8>,
    effect: EffectId,
) -> HidppCommand {
    match connection {
        ConnectionType::Bolt => {
            encode_feature_request(transport_index.unwrap_or(0), features::HAPTIC, &[effect.get()])
        }
        ConnectionType::Bluetooth => {
            HidppCommand::from_parts(report_type::LONG, BLUETOOTH_HAPTIC_PREFIX, &[effect.get()])
        }
    }
}

// ============================================================================
// Response Frames
// ============================================================================

/// Decoded answer frame from the Bolt receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidppResponse {
    /// Report type (short or long)
    pub report_type: u8,
    /// Device index that answered
    pub device_index: u8,
    /// Feature identifier echoed back
    pub feature_id: u16,
    /// Remaining payload bytes
    pub payload: Vec<u8>,
}

/// Decode an answer frame
///
/// Reads `[report type][device index][feature id, big-endian]`; the rest is
/// payload. Fewer than 4 bytes is malformed.
pub fn decode_response(bytes: &[u8]) -> Result<HidppResponse, ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::Malformed { len: bytes.len() });
    }

    Ok(HidppResponse {
        report_type: bytes[0],
        device_index: bytes[1],
        feature_id: u16::from_be_bytes([bytes[2], bytes[3]]),
        payload: bytes[HEADER_LEN..].to_vec(),
    })
}

// ============================================================================
// Error Types
// ============================================================================

/// Codec error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Response shorter than the 4-byte header
    Malformed { len: usize },
    /// Effect outside `0..=15`
    EffectOutOfRange(i64),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed { len } => {
                write!(f, "Malformed HID++ response: {} bytes, need at least {}", len, HEADER_LEN)
            }
            ProtocolError::EffectOutOfRange(value) => write!(
                f,
                "Effect {} out of range ({}-{})",
                value,
                EffectId::MIN,
                EffectId::MAX
            ),
        }
    }
}

impl std::error::Error for ProtocolError {}

// ============================================================================
// Tests
// ============================================================================
