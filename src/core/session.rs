//! Receiver session: connector, callback bridge and the blocking loop
//!
//! A session owns the transport handle, the driver and the downstream sink
//! for one receiver. `connect` brings the link up with bounded retries,
//! `run` drives the driver's receive path until the externally owned run
//! flag clears or the link is declared dead. Everything happens on the
//! caller's thread; the driver re-enters the bridge synchronously while its
//! `receive` call is still on the stack.

use crate::config::SessionConfig;
use crate::core::driver::{
    DriverCallbacks, DriverEvent, GnssDriver, OutputMode, PositionReport, SatelliteInfo,
    SurveyInStatus, RECEIVE_POSITION, RECEIVE_SATELLITE,
};
use crate::core::publish::{nav_fix_from_report, ReportSink};
use crate::core::transport::{FrameSettings, Transport};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Total transport open attempts before the connector gives up.
const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Consecutive empty receives tolerated before the loop declares the link
/// dead. Checksum failures and bus noise surface as empty receives, so a
/// short burst must not end the session.
const MAX_EMPTY_RECEIVES: u32 = 3;

/// Blocking read timeout configured on the transport at connect time.
const CONNECT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Receive budget handed to the driver on every loop iteration.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected
    NotConnected,
    /// Connection in progress
    Connecting,
    /// Connected and configured
    Connected,
}

/// Connection state owned by the session.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Current link state
    pub state: LinkState,
    /// Port identifier
    pub port: String,
    /// Configured line rate
    pub baud: u32,
    /// Last-known open/closed state of the transport
    pub port_open: bool,
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Receiver configuration failed; the loop never started
    ConfigFailed,
    /// The externally owned run flag was cleared
    Stopped,
    /// Too many consecutive empty receives
    LinkDead,
}

/// The single implementor of the driver callback contract.
///
/// Owns the transport handle, the downstream sink and the survey-in slot;
/// every driver-to-transport and driver-to-application interaction goes
/// through here.
pub struct CallbackBridge {
    transport: Box<dyn Transport>,
    sink: Box<dyn ReportSink>,
    survey: SurveyInStatus,
}

impl CallbackBridge {
    /// Create a bridge over the given transport and sink.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, sink: Box<dyn ReportSink>) -> Self {
        Self {
            transport,
            sink,
            survey: SurveyInStatus::default(),
        }
    }

    /// Shared access to the transport
    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Exclusive access to the transport
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Exclusive access to the downstream sink
    pub fn sink_mut(&mut self) -> &mut dyn ReportSink {
        self.sink.as_mut()
    }

    /// Latest survey-in status delivered by the driver
    #[must_use]
    pub fn survey_status(&self) -> SurveyInStatus {
        self.survey
    }
}

impl DriverCallbacks for CallbackBridge {
    fn on_event(&mut self, event: DriverEvent<'_>) -> i32 {
        match event {
            DriverEvent::ReadDeviceData { buf, timeout } => {
                if self.transport.bytes_available().unwrap_or(0) == 0
                    && !self.transport.wait_readable(timeout)
                {
                    return 0;
                }
                match self.transport.read(buf) {
                    Ok(n) => n as i32,
                    Err(e) => {
                        debug!("device read failed: {}", e);
                        0
                    }
                }
            }
            DriverEvent::WriteDeviceData { data } => match self.transport.write(data) {
                Ok(n) if n == data.len() => n as i32,
                Ok(n) => {
                    warn!("short write to receiver: {} of {} bytes", n, data.len());
                    -1
                }
                Err(e) => {
                    warn!("device write failed: {}", e);
                    -1
                }
            },
            DriverEvent::SetBaudRate { baud } => match self.transport.set_baud_rate(baud) {
                Ok(()) => {
                    debug!("line rate changed to {}", baud);
                    1
                }
                Err(e) => {
                    warn!("line rate change to {} failed: {}", baud, e);
                    0
                }
            },
            DriverEvent::CorrectionReady { data } => {
                // The driver reuses this buffer once the callback returns;
                // the copy has to happen here.
                self.sink.publish_corrections(Bytes::copy_from_slice(data));
                0
            }
            DriverEvent::SurveyInStatus { status } => {
                self.survey = *status;
                debug!(
                    "survey-in: {} s, mean accuracy {} mm, valid {}, active {}",
                    status.duration,
                    status.mean_accuracy,
                    status.valid(),
                    status.active()
                );
                0
            }
            DriverEvent::SetClock => 0,
        }
    }
}

/// Session bridging one transport to one receiver driver.
pub struct GnssSession<D: GnssDriver> {
    driver: D,
    bridge: CallbackBridge,
    connection: ConnectionState,
    position: PositionReport,
    satellites: Option<SatelliteInfo>,
    run_flag: Arc<AtomicBool>,
}

impl<D: GnssDriver> GnssSession<D> {
    /// Create a session. Survey-in thresholds from the configuration are
    /// handed to the driver immediately; the transport stays untouched
    /// until [`GnssSession::connect`].
    #[must_use]
    pub fn new(
        config: &SessionConfig,
        mut driver: D,
        transport: Box<dyn Transport>,
        sink: Box<dyn ReportSink>,
    ) -> Self {
        // Driver accuracy unit is 0.1 mm.
        driver.set_survey_specs(
            (config.survey_accuracy * 10_000.0) as u32,
            config.survey_duration as u32,
        );

        Self {
            driver,
            bridge: CallbackBridge::new(transport, sink),
            connection: ConnectionState {
                state: LinkState::NotConnected,
                port: config.port.clone(),
                baud: config.baud,
                port_open: false,
            },
            position: PositionReport::default(),
            satellites: None,
            run_flag: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The cooperative run flag. Clearing it ends [`GnssSession::run`] after
    /// the in-flight receive call completes.
    #[must_use]
    pub fn run_flag(&self) -> Arc<AtomicBool> {
        self.run_flag.clone()
    }

    /// Current connection state
    #[must_use]
    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    /// Latest survey-in status (duration, mean accuracy, valid/active flags)
    #[must_use]
    pub fn survey_status(&self) -> SurveyInStatus {
        self.bridge.survey_status()
    }

    /// Position slot as of the last published fix
    #[must_use]
    pub fn last_position(&self) -> &PositionReport {
        &self.position
    }

    /// Satellite slot as of the last published count
    #[must_use]
    pub fn last_satellites(&self) -> Option<&SatelliteInfo> {
        self.satellites.as_ref()
    }

    /// The driver, for inspection
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Exclusive access to the driver, for wiring done after construction
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Bring the transport up: bounded open retries, then frame shape, line
    /// rate and read timeout, all before the link is reported connected.
    ///
    /// Returns [`LinkState::NotConnected`] once all attempts are spent; the
    /// caller must not proceed to [`GnssSession::run`] in that case, and
    /// whether to try again is the caller's decision.
    pub fn connect(&mut self) -> LinkState {
        self.connection.state = LinkState::Connecting;

        let transport = self.bridge.transport_mut();
        if !transport.is_open() {
            for attempt in 1..=MAX_CONNECT_ATTEMPTS {
                match transport.open() {
                    Ok(()) => {
                        debug!("transport open on attempt {}", attempt);
                        break;
                    }
                    Err(e) if e.is_fault() => {
                        error!(
                            "unexpected fault opening {} (attempt {}/{}): {}",
                            self.connection.port, attempt, MAX_CONNECT_ATTEMPTS, e
                        );
                    }
                    Err(e) => {
                        warn!(
                            "failed to open {} (attempt {}/{}): {}",
                            self.connection.port, attempt, MAX_CONNECT_ATTEMPTS, e
                        );
                    }
                }
            }
        }

        if !transport.is_open() {
            self.connection.state = LinkState::NotConnected;
            self.connection.port_open = false;
            return self.connection.state;
        }

        match configure_link(transport, self.connection.baud) {
            Ok(()) => {
                info!("receiver link up: {}", transport.connection_info());
                self.connection.state = LinkState::Connected;
                self.connection.port_open = true;
            }
            Err(e) => {
                warn!("transport configuration failed: {}", e);
                transport.close();
                self.connection.state = LinkState::NotConnected;
                self.connection.port_open = false;
            }
        }

        self.connection.state
    }

    /// Run the session loop until the run flag clears or the link dies.
    ///
    /// Configures the driver for correction output first; a configuration
    /// failure is logged and ends the session without retrying. No
    /// reconnect is attempted here; restarting is the caller's business.
    pub fn run(&mut self) -> SessionEnd {
        let end = self.run_loop();
        self.connection.port_open = self.bridge.transport().is_open();
        warn!("session loop terminated: {:?}", end);
        end
    }

    fn run_loop(&mut self) -> SessionEnd {
        match self
            .driver
            .configure(&mut self.bridge, self.connection.baud, OutputMode::Rtcm)
        {
            Ok(()) => info!("receiver configured for correction output"),
            Err(e) => {
                error!("receiver configuration failed: {}", e);
                return SessionEnd::ConfigFailed;
            }
        }

        self.position = PositionReport::default();

        let mut empty_receives = 0u32;

        while self.run_flag.load(Ordering::Relaxed) {
            if empty_receives >= MAX_EMPTY_RECEIVES {
                return SessionEnd::LinkDead;
            }

            let ret = self.driver.receive(&mut self.bridge, RECEIVE_TIMEOUT);
            trace!("receive returned {}", ret);

            if ret > 0 {
                empty_receives = 0;

                if ret & RECEIVE_POSITION != 0 {
                    self.position = *self.driver.position();
                    let fix = nav_fix_from_report(&self.position);
                    debug!(
                        "fix: lat {:.7} lon {:.7} alt {:.2} quality {} sats {}",
                        self.position.lat,
                        self.position.lon,
                        self.position.alt,
                        self.position.fix_type,
                        self.position.satellites_used
                    );
                    self.bridge.sink_mut().publish_fix(fix);
                    empty_receives = 0;
                }

                if ret & RECEIVE_SATELLITE != 0 {
                    if let Some(info) = self.driver.satellite_info() {
                        let count = info.count;
                        self.satellites = Some(*info);
                        self.bridge.sink_mut().publish_satellites(count);
                        empty_receives = 0;
                    }
                }
            } else {
                empty_receives += 1;
            }
        }

        SessionEnd::Stopped
    }
}

/// Frame shape, line rate and read timeout, applied in that order before
/// the link is reported connected.
fn configure_link(
    transport: &mut dyn Transport,
    baud: u32,
) -> Result<(), crate::core::transport::TransportError> {
    transport.set_frame(FrameSettings::default())?;
    transport.set_baud_rate(baud)?;
    transport.set_timeout(CONNECT_READ_TIMEOUT)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::{ScriptStep, ScriptedDriver};
    use crate::core::publish::{BridgeEvent, ChannelSink, NullSink};
    use crate::core::transport::{ConfigCall, LoopbackHandle, LoopbackTransport};

    fn session_parts(
        config: &SessionConfig,
        driver: ScriptedDriver,
    ) -> (
        GnssSession<ScriptedDriver>,
        LoopbackHandle,
        crossbeam_channel::Receiver<BridgeEvent>,
    ) {
        let (transport, handle) = LoopbackTransport::new(&config.port);
        let (sink, rx) = ChannelSink::new();
        let session = GnssSession::new(config, driver, Box::new(transport), Box::new(sink));
        (session, handle, rx)
    }

    fn open_bridge() -> (CallbackBridge, LoopbackHandle) {
        let (mut transport, handle) = LoopbackTransport::new("bridge");
        transport.open().unwrap();
        let bridge = CallbackBridge::new(Box::new(transport), Box::new(NullSink));
        (bridge, handle)
    }

    #[test]
    fn connect_succeeds_on_fifth_attempt() {
        let config = SessionConfig::new("ttyTEST0", 38_400);
        let (mut session, handle, _rx) = session_parts(&config, ScriptedDriver::new());
        for _ in 0..4 {
            handle.fail_next_open(false);
        }

        assert_eq!(session.connect(), LinkState::Connected);
        assert_eq!(handle.baud_rate(), 38_400);
        assert!(session.connection().port_open);

        let calls = handle.config_calls();
        assert_eq!(
            calls,
            vec![
                ConfigCall::Frame(FrameSettings::default()),
                ConfigCall::Baud(38_400),
                ConfigCall::Timeout(Duration::from_millis(500)),
            ]
        );
    }

    #[test]
    fn connect_gives_up_after_five_attempts() {
        let config = SessionConfig::new("ttyTEST0", 38_400);
        let (mut session, handle, _rx) = session_parts(&config, ScriptedDriver::new());
        for i in 0..5 {
            // One fault-class failure in the mix; it counts like the rest.
            handle.fail_next_open(i == 2);
        }

        assert_eq!(session.connect(), LinkState::NotConnected);
        assert!(!handle.is_open());
        assert!(!session.connection().port_open);
        assert!(handle.config_calls().is_empty());
    }

    #[test]
    fn connect_reuses_open_transport() {
        let config = SessionConfig::new("ttyTEST0", 38_400);
        let (mut session, handle, _rx) = session_parts(&config, ScriptedDriver::new());
        // A scripted failure must not be consumed when the port is already
        // open from a previous connect.
        assert_eq!(session.connect(), LinkState::Connected);
        handle.fail_next_open(false);
        assert_eq!(session.connect(), LinkState::Connected);
    }

    #[test]
    fn bridge_read_times_out_empty() {
        let (mut bridge, _handle) = open_bridge();
        let mut buf = [0u8; 16];
        let ret = bridge.on_event(DriverEvent::ReadDeviceData {
            buf: &mut buf,
            timeout: Duration::from_millis(20),
        });
        assert_eq!(ret, 0);
    }

    #[test]
    fn bridge_read_returns_available_bytes() {
        let (mut bridge, handle) = open_bridge();
        handle.inject_rx(b"\xb5\x62\x01\x07\x00");

        let mut buf = [0u8; 16];
        let ret = bridge.on_event(DriverEvent::ReadDeviceData {
            buf: &mut buf,
            timeout: Duration::from_millis(20),
        });
        assert_eq!(ret, 5);
        assert_eq!(&buf[..5], b"\xb5\x62\x01\x07\x00");
    }

    #[test]
    fn bridge_write_full_length_or_minus_one() {
        let (mut bridge, handle) = open_bridge();
        assert_eq!(
            bridge.on_event(DriverEvent::WriteDeviceData { data: b"abcd" }),
            4
        );

        handle.limit_writes(Some(2));
        assert_eq!(
            bridge.on_event(DriverEvent::WriteDeviceData { data: b"efgh" }),
            -1
        );
    }

    #[test]
    fn bridge_baud_change_reports_success_flag() {
        let (mut bridge, handle) = open_bridge();
        assert_eq!(
            bridge.on_event(DriverEvent::SetBaudRate { baud: 115_200 }),
            1
        );
        assert_eq!(handle.baud_rate(), 115_200);

        bridge.transport_mut().close();
        assert_eq!(
            bridge.on_event(DriverEvent::SetBaudRate { baud: 9_600 }),
            0
        );
    }

    #[test]
    fn bridge_copies_corrections_before_returning() {
        let (mut transport, _handle) = LoopbackTransport::new("bridge");
        transport.open().unwrap();
        let (sink, rx) = ChannelSink::new();
        let mut bridge = CallbackBridge::new(Box::new(transport), Box::new(sink));

        let mut data = b"\xd3\x00\x13correction-payload".to_vec();
        assert_eq!(
            bridge.on_event(DriverEvent::CorrectionReady { data: &data }),
            0
        );

        // Driver reuses its buffer immediately; the forwarded copy must be
        // unaffected.
        data.fill(0);
        match rx.try_recv().unwrap() {
            BridgeEvent::Corrections(bytes) => {
                assert_eq!(&bytes[..], b"\xd3\x00\x13correction-payload");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn bridge_replaces_survey_slot() {
        let (mut bridge, _handle) = open_bridge();
        let status = SurveyInStatus {
            duration: 42,
            mean_accuracy: 1_800,
            flags: 0b11,
        };
        assert_eq!(
            bridge.on_event(DriverEvent::SurveyInStatus { status: &status }),
            0
        );
        assert_eq!(bridge.survey_status(), status);
        assert!(bridge.survey_status().valid());
        assert!(bridge.survey_status().active());
    }

    #[test]
    fn bridge_set_clock_is_a_noop() {
        let (mut bridge, _handle) = open_bridge();
        assert_eq!(bridge.on_event(DriverEvent::SetClock), 0);
    }

    #[test]
    fn loop_aborts_after_three_consecutive_empty_receives() {
        let config = SessionConfig::new("ttyTEST0", 38_400);
        let mut driver = ScriptedDriver::new();
        for _ in 0..3 {
            driver.enqueue(ScriptStep::produce(0));
        }
        // Must never be reached.
        driver.enqueue(ScriptStep::produce(RECEIVE_POSITION));

        let (mut session, _handle, rx) = session_parts(&config, driver);
        session.connect();
        assert_eq!(session.run(), SessionEnd::LinkDead);
        assert_eq!(session.driver().receive_calls(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn loop_counter_resets_on_positive_third_call() {
        let config = SessionConfig::new("ttyTEST0", 38_400);
        let mut driver = ScriptedDriver::new();
        driver.enqueue(ScriptStep::produce(0));
        driver.enqueue(ScriptStep::produce(-1));
        driver.enqueue(
            ScriptStep::produce(RECEIVE_POSITION).position(PositionReport {
                fix_type: 3,
                ..Default::default()
            }),
        );
        driver.enqueue(ScriptStep::produce(0));
        driver.enqueue(ScriptStep::produce(0));
        driver.enqueue(ScriptStep::produce(0));

        let (mut session, _handle, rx) = session_parts(&config, driver);
        session.connect();
        assert_eq!(session.run(), SessionEnd::LinkDead);
        // Two empties, a reset on the third call, then three more empties.
        assert_eq!(session.driver().receive_calls(), 6);
        assert!(matches!(rx.try_recv(), Ok(BridgeEvent::Fix(_))));
    }

    #[test]
    fn loop_never_starts_when_configure_fails() {
        let config = SessionConfig::new("ttyTEST0", 38_400);
        let mut driver = ScriptedDriver::new();
        driver.fail_configure("no ack from receiver");
        driver.enqueue(ScriptStep::produce(RECEIVE_POSITION));

        let (mut session, _handle, _rx) = session_parts(&config, driver);
        session.connect();
        assert_eq!(session.run(), SessionEnd::ConfigFailed);
        assert_eq!(session.driver().receive_calls(), 0);
    }

    #[test]
    fn loop_ignores_reserved_receive_bits() {
        let config = SessionConfig::new("ttyTEST0", 38_400);
        let mut driver = ScriptedDriver::new();
        // Only a reserved bit set: positive, so the counter resets, but
        // nothing is published.
        driver.enqueue(ScriptStep::produce(0));
        driver.enqueue(ScriptStep::produce(0));
        driver.enqueue(ScriptStep::produce(0b100));

        let (mut session, _handle, rx) = session_parts(&config, driver);
        session.connect();
        assert_eq!(session.run(), SessionEnd::LinkDead);
        // The reserved-bit result on call 3 reset the counter, so three more
        // empty receives were needed to kill the link.
        assert_eq!(session.driver().receive_calls(), 6);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn survey_specs_are_converted_to_driver_units() {
        let config = SessionConfig::new("ttyTEST0", 38_400)
            .survey_accuracy(1.5)
            .survey_duration(120.0);
        let (session, _handle, _rx) = session_parts(&config, ScriptedDriver::new());
        assert_eq!(session.driver().survey_specs(), Some((15_000, 120)));
    }
}
