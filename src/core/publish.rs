//! Report publishers and downstream sinks
//!
//! Stateless translators from driver reports to outbound events, plus the
//! fire-and-forget sink seam the session publishes through. Event stamps are
//! taken at publish time, not decode time.

use crate::core::driver::PositionReport;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Output fix classification derived from the receiver-native code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixStatus {
    /// No usable solution
    NoFix,
    /// Autonomous 3D fix
    Fix,
    /// Augmented fix (SBAS/DGPS/RTK class)
    AugmentedFix,
    /// Dead-reckoning / estimated solution
    DeadReckoning,
}

/// How the covariance matrix of a [`NavFix`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovarianceType {
    /// No covariance available
    Unknown,
    /// Diagonal approximated from the receiver's error estimates
    Approximated,
    /// Diagonal reported by the receiver
    DiagonalKnown,
    /// Full matrix reported by the receiver
    Known,
}

/// Published position fix.
#[derive(Debug, Clone, PartialEq)]
pub struct NavFix {
    /// Publish-time stamp, UTC
    pub stamp: DateTime<Utc>,
    /// Latitude, degrees
    pub latitude: f64,
    /// Longitude, degrees
    pub longitude: f64,
    /// Altitude above MSL, meters
    pub altitude: f64,
    /// Fix classification
    pub status: FixStatus,
    /// Row-major 3x3 position covariance, meters squared
    pub position_covariance: [f64; 9],
    /// Covariance provenance
    pub covariance_type: CovarianceType,
}

/// Map the receiver-native fix-quality code onto the published
/// classification.
///
/// Codes 0-2 carry no usable solution, 3 is an autonomous fix, 4-6 are
/// augmented solutions, 8 is dead reckoning. Anything else is treated as no
/// fix.
#[must_use]
pub fn fix_status_from_quality(code: u8) -> FixStatus {
    match code {
        3 => FixStatus::Fix,
        4..=6 => FixStatus::AugmentedFix,
        8 => FixStatus::DeadReckoning,
        _ => FixStatus::NoFix,
    }
}

/// Build a publishable fix from the current position report, stamped now.
///
/// The receiver's horizontal error estimate lands in the two horizontal
/// diagonal slots and the vertical estimate in the third; every off-diagonal
/// element stays zero and the matrix is tagged approximated.
#[must_use]
pub fn nav_fix_from_report(report: &PositionReport) -> NavFix {
    let mut covariance = [0.0f64; 9];
    covariance[0] = f64::from(report.eph);
    covariance[4] = f64::from(report.eph);
    covariance[8] = f64::from(report.epv);

    NavFix {
        stamp: Utc::now(),
        latitude: report.lat,
        longitude: report.lon,
        altitude: report.alt,
        status: fix_status_from_quality(report.fix_type),
        position_covariance: covariance,
        covariance_type: CovarianceType::Approximated,
    }
}

/// Event published by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Position fix
    Fix(NavFix),
    /// Visible-satellite count
    Satellites {
        /// Number of visible satellites
        count: u8,
    },
    /// Raw correction bytes, exact length and order preserved
    Corrections(Bytes),
}

/// Downstream consumer of session output. Every publish is fire-and-forget;
/// there is no acknowledgment path back into the session.
pub trait ReportSink {
    /// Publish a position fix
    fn publish_fix(&mut self, fix: NavFix);

    /// Publish a visible-satellite count
    fn publish_satellites(&mut self, count: u8);

    /// Publish a correction message
    fn publish_corrections(&mut self, data: Bytes);
}

/// Sink that fans events out on a crossbeam channel.
///
/// A dropped receiver does not disturb the session; events are silently
/// discarded from then on.
pub struct ChannelSink {
    tx: crossbeam_channel::Sender<BridgeEvent>,
}

impl ChannelSink {
    /// Create a sink together with the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, crossbeam_channel::Receiver<BridgeEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl ReportSink for ChannelSink {
    fn publish_fix(&mut self, fix: NavFix) {
        let _ = self.tx.send(BridgeEvent::Fix(fix));
    }

    fn publish_satellites(&mut self, count: u8) {
        let _ = self.tx.send(BridgeEvent::Satellites { count });
    }

    fn publish_corrections(&mut self, data: Bytes) {
        let _ = self.tx.send(BridgeEvent::Corrections(data));
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn publish_fix(&mut self, _fix: NavFix) {}

    fn publish_satellites(&mut self, _count: u8) {}

    fn publish_corrections(&mut self, _data: Bytes) {}
}
