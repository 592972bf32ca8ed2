//! # Rtklink
//!
//! A session bridge between a byte-oriented serial transport and a stateful
//! GNSS RTK receiver driver:
//!
//! - Connection establishment with bounded retries
//! - A blocking receive loop with a consecutive-failure abort policy
//! - The callback dispatch contract that lets the driver work the transport
//!   without owning it
//! - Translation of decoded reports into position, satellite-count and
//!   correction events for downstream consumers
//!
//! The protocol driver itself (wire framing, checksums, message parsing) is
//! an external collaborator behind the [`GnssDriver`] trait; this crate
//! ships a deterministic [`ScriptedDriver`] for tests and demos.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rtklink::{
//!     ChannelSink, GnssSession, LinkState, ScriptedDriver, SerialTransport, SessionConfig,
//! };
//!
//! fn main() {
//!     let config = SessionConfig::new("/dev/ttyACM0", 38_400);
//!     let transport = SerialTransport::new(&config.port, config.baud);
//!     let (sink, events) = ChannelSink::new();
//!
//!     let mut session = GnssSession::new(
//!         &config,
//!         ScriptedDriver::new(),
//!         Box::new(transport),
//!         Box::new(sink),
//!     );
//!
//!     if session.connect() == LinkState::Connected {
//!         session.run();
//!     }
//!
//!     for event in events.try_iter() {
//!         println!("{event:?}");
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::SessionConfig;
pub use crate::core::driver::{
    DriverCallbacks, DriverError, DriverEvent, GnssDriver, OutputMode, PositionReport,
    SatelliteInfo, ScriptStep, ScriptedDriver, SurveyInStatus, RECEIVE_POSITION,
    RECEIVE_SATELLITE,
};
pub use crate::core::publish::{
    fix_status_from_quality, nav_fix_from_report, BridgeEvent, ChannelSink, CovarianceType,
    FixStatus, NavFix, NullSink, ReportSink,
};
pub use crate::core::session::{
    CallbackBridge, ConnectionState, GnssSession, LinkState, SessionEnd,
};
pub use crate::core::transport::{
    FrameSettings, LoopbackHandle, LoopbackTransport, SerialFlowControl, SerialParity,
    SerialTransport, Transport, TransportError, TransportStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
