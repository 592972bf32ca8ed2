//! GNSS driver contract
//!
//! The protocol driver is an external collaborator: it owns the receiver's
//! wire format (framing, checksums, message parsing) and this crate owns the
//! transport. The inversion is expressed through [`DriverCallbacks`]: while a
//! [`GnssDriver::receive`] call is on the stack, the driver re-enters the
//! session's callback bridge with typed [`DriverEvent`]s to read and write
//! device bytes and to deliver decoded artifacts.
//!
//! Decoded position and satellite reports stay owned by the driver and are
//! exposed through accessors; the session copies them out when the receive
//! bitmask announces them.

pub mod scripted;

pub use scripted::{ScriptStep, ScriptedDriver};

use std::time::Duration;
use thiserror::Error;

/// Receive-result bit announcing a fresh position report.
pub const RECEIVE_POSITION: i32 = 1 << 0;

/// Receive-result bit announcing a fresh satellite-info report.
pub const RECEIVE_SATELLITE: i32 = 1 << 1;

/// Driver output mode selected at configure time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Position/velocity output only
    Gps,
    /// Position output plus RTCM correction stream (base-station use)
    Rtcm,
}

/// Driver error types
#[derive(Error, Debug)]
pub enum DriverError {
    /// Receiver rejected or never acknowledged its configuration
    #[error("receiver configuration failed: {0}")]
    ConfigurationFailed(String),

    /// Protocol-level failure outside the transient decode class
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Receiver-native position solution, overwritten on each successful decode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionReport {
    /// Receiver time of the solution, microseconds
    pub time_usec: u64,
    /// Latitude, degrees
    pub lat: f64,
    /// Longitude, degrees
    pub lon: f64,
    /// Altitude above MSL, meters
    pub alt: f64,
    /// Horizontal position error estimate, meters
    pub eph: f32,
    /// Vertical position error estimate, meters
    pub epv: f32,
    /// Horizontal dilution of precision
    pub hdop: f32,
    /// Vertical dilution of precision
    pub vdop: f32,
    /// Receiver-native fix-quality code
    pub fix_type: u8,
    /// Heading, radians
    pub heading: f32,
    /// Satellites used in the solution
    pub satellites_used: u8,
}

/// Slots in the per-satellite arrays of [`SatelliteInfo`].
pub const SATELLITE_INFO_MAX: usize = 20;

/// Visible-satellite report. Only `count` is interpreted by this crate; the
/// per-satellite arrays pass through opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatelliteInfo {
    /// Number of visible satellites
    pub count: u8,
    /// Space vehicle IDs
    pub svid: [u8; SATELLITE_INFO_MAX],
    /// Used-in-solution flags
    pub used: [u8; SATELLITE_INFO_MAX],
    /// Elevation, degrees
    pub elevation: [u8; SATELLITE_INFO_MAX],
    /// Azimuth, scaled degrees
    pub azimuth: [u8; SATELLITE_INFO_MAX],
    /// Carrier-to-noise density, dB-Hz
    pub snr: [u8; SATELLITE_INFO_MAX],
}

impl Default for SatelliteInfo {
    fn default() -> Self {
        Self {
            count: 0,
            svid: [0; SATELLITE_INFO_MAX],
            used: [0; SATELLITE_INFO_MAX],
            elevation: [0; SATELLITE_INFO_MAX],
            azimuth: [0; SATELLITE_INFO_MAX],
            snr: [0; SATELLITE_INFO_MAX],
        }
    }
}

/// Survey-in progress report produced by the driver during base-station
/// self-calibration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurveyInStatus {
    /// Elapsed survey duration, seconds
    pub duration: u32,
    /// Mean position accuracy so far, millimeters
    pub mean_accuracy: u32,
    /// Bit 0: position valid, bit 1: survey active
    pub flags: u8,
}

impl SurveyInStatus {
    /// Whether the surveyed position is valid
    #[must_use]
    pub fn valid(&self) -> bool {
        self.flags & 0b01 != 0
    }

    /// Whether the survey is still running
    #[must_use]
    pub fn active(&self) -> bool {
        (self.flags >> 1) & 1 != 0
    }
}

/// Callback event raised by the driver while `configure` or `receive` is on
/// the stack.
///
/// Buffer payloads are borrowed views valid only within the call; anything
/// needed afterwards must be copied before returning.
#[derive(Debug)]
pub enum DriverEvent<'a> {
    /// Read device bytes into `buf`. If nothing is available, wait up to
    /// `timeout` for the transport to become readable.
    ReadDeviceData {
        /// Destination buffer; its length is the requested read size
        buf: &'a mut [u8],
        /// How long to wait for readability when the queue is empty
        timeout: Duration,
    },
    /// Write the full buffer to the device.
    WriteDeviceData {
        /// Bytes to send
        data: &'a [u8],
    },
    /// Reconfigure the transport's line rate in place.
    SetBaudRate {
        /// New rate
        baud: u32,
    },
    /// A correction message is ready. The buffer is transient; the driver
    /// may reuse it immediately after the callback returns.
    CorrectionReady {
        /// Correction bytes
        data: &'a [u8],
    },
    /// Survey-in progress update. The reference is callback-scoped.
    SurveyInStatus {
        /// Current status
        status: &'a SurveyInStatus,
    },
    /// Receiver time is available for host clock sync. Time-sync is
    /// delegated elsewhere; the bridge treats this as a deliberate no-op.
    SetClock,
}

/// Receiver of driver callback events.
///
/// Implemented once, by the session's callback bridge. Returns the signed
/// value the driver contract expects per event kind: bytes read for
/// [`DriverEvent::ReadDeviceData`] (0 on timeout or error), the full length
/// or -1 for [`DriverEvent::WriteDeviceData`], a 0/1 success flag for
/// [`DriverEvent::SetBaudRate`], and 0 otherwise.
pub trait DriverCallbacks {
    /// Dispatch one callback event.
    fn on_event(&mut self, event: DriverEvent<'_>) -> i32;
}

/// Protocol driver for a GNSS receiver.
///
/// Both entry points are synchronous; every [`DriverEvent`] they raise is
/// dispatched strictly nested inside the call, on the caller's thread.
pub trait GnssDriver {
    /// Configure the receiver for the given line rate and output mode.
    fn configure(
        &mut self,
        callbacks: &mut dyn DriverCallbacks,
        baud: u32,
        mode: OutputMode,
    ) -> Result<(), DriverError>;

    /// Pump the receive path for up to `timeout`.
    ///
    /// A positive return is a bitmask: [`RECEIVE_POSITION`] and
    /// [`RECEIVE_SATELLITE`] announce fresh reports; further bits are
    /// reserved and ignored by this crate. Zero or negative means nothing
    /// decoded (timeout, checksum mismatch, bus error).
    fn receive(&mut self, callbacks: &mut dyn DriverCallbacks, timeout: Duration) -> i32;

    /// Set survey-in acceptance thresholds: minimum accuracy in 0.1 mm
    /// units and minimum duration in seconds.
    fn set_survey_specs(&mut self, accuracy_tenth_mm: u32, duration_s: u32);

    /// Latest decoded position solution.
    fn position(&self) -> &PositionReport;

    /// Latest decoded satellite report, if the driver produces one.
    fn satellite_info(&self) -> Option<&SatelliteInfo>;
}
