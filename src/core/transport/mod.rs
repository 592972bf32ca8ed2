//! Transport layer for the receiver link
//!
//! Supports:
//! - Serial ports (USB-Serial / UART receivers)
//! - In-memory loopback pairs (tests, demos)
//!
//! The trait is synchronous and blocking: the session loop is the only
//! thread that touches a transport, and the driver re-enters it from
//! within `receive` through the callback bridge.

mod loopback;
mod serial;

pub use loopback::{ConfigCall, LoopbackHandle, LoopbackTransport};
pub use serial::SerialTransport;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Serial frame parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial frame flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Byte-frame shape applied to a transport after it opens.
///
/// The default is the receiver link shape: 8 data bits, no parity, 1 stop
/// bit, no flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSettings {
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            data_bits: 8,
            parity: SerialParity::None,
            stop_bits: 1,
            flow_control: SerialFlowControl::None,
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Port not found
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Open failed
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// Unexpected device fault, distinct from an ordinary open failure
    #[error("unexpected device fault: {0}")]
    DeviceFault(String),

    /// Operation on a transport that is not open
    #[error("transport not open")]
    NotOpen,

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True for the fault class that the connector logs at the highest
    /// severity while still counting it as a failed attempt.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::DeviceFault(_))
    }
}

/// Transport statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Bytes written to the device
    pub bytes_sent: u64,
    /// Bytes read from the device
    pub bytes_received: u64,
    /// I/O errors observed
    pub errors: u64,
}

/// Byte-oriented channel to the receiver hardware.
///
/// Exactly one handle is live per session; `open` on an already-open
/// transport reuses it. All calls block on the single session thread.
pub trait Transport: Send {
    /// Open the underlying device. Reuses the existing handle if open.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Close and release the underlying device.
    fn close(&mut self);

    /// Check whether the device is open
    fn is_open(&self) -> bool;

    /// Reconfigure the line rate in place
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError>;

    /// Apply the byte-frame shape (data bits, parity, stop bits, flow control)
    fn set_frame(&mut self, frame: FrameSettings) -> Result<(), TransportError>;

    /// Set the blocking read timeout
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Number of bytes ready to read without blocking
    fn bytes_available(&mut self) -> Result<u32, TransportError>;

    /// Block until the device is readable or the timeout elapses.
    ///
    /// Returns `false` if no data arrived within `timeout`.
    fn wait_readable(&mut self, timeout: Duration) -> bool;

    /// Read up to `buf.len()` bytes. Returns `Ok(0)` when the read timed
    /// out with no data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write `data`, returning the number of bytes accepted. May be short;
    /// the caller decides whether a short write is a failure.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Get transfer statistics
    fn stats(&self) -> TransportStats;

    /// Get a human-readable description of the endpoint
    fn connection_info(&self) -> String;
}
