//! End-to-end session exercises over the loopback transport

use bytes::Bytes;
use rtklink::{
    BridgeEvent, ChannelSink, FixStatus, GnssSession, LinkState, OutputMode, PositionReport,
    SatelliteInfo, ScriptStep, ScriptedDriver, SessionConfig, SessionEnd, SurveyInStatus,
};
use rtklink::{LoopbackHandle, LoopbackTransport, RECEIVE_POSITION, RECEIVE_SATELLITE};
use std::time::Duration;

fn build_session(
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

fn sat_report(count: u8) -> SatelliteInfo {
    SatelliteInfo {
        count,
        ..Default::default()
    }
}

/// First-attempt connect at 38400 on port "X", receive results
/// `1, 0, 3, 0, 0`, loop still alive afterwards.
#[test]
fn end_to_end_receive_scenario() {
    let config = SessionConfig::new("X", 38_400);

    let first_fix = PositionReport {
        lat: 50.8503,
        lon: 4.3517,
        alt: 13.1,
        eph: 0.9,
        epv: 1.4,
        fix_type: 3,
        satellites_used: 11,
        ..Default::default()
    };
    let second_fix = PositionReport {
        fix_type: 5,
        lat: 50.8504,
        lon: 4.3518,
        alt: 13.0,
        ..Default::default()
    };

    let mut driver = ScriptedDriver::new();
    driver.enqueue(ScriptStep::produce(RECEIVE_POSITION).position(first_fix));
    driver.enqueue(ScriptStep::produce(0));
    driver.enqueue(
        ScriptStep::produce(RECEIVE_POSITION | RECEIVE_SATELLITE)
            .position(second_fix)
            .satellites(sat_report(9)),
    );
    driver.enqueue(ScriptStep::produce(0));
    driver.enqueue(ScriptStep::produce(0));

    let (mut session, handle, rx) = build_session(&config, driver);
    let flag = session.run_flag();
    session.driver_mut().stop_when_exhausted(flag);

    assert_eq!(session.connect(), LinkState::Connected);
    assert_eq!(handle.baud_rate(), 38_400);

    assert_eq!(session.run(), SessionEnd::Stopped);

    // Two tolerated empties after the reset on call 3, then the exhausted
    // script cleared the flag on call 6: the 3-strikes threshold was never
    // reached.
    assert_eq!(session.driver().receive_calls(), 6);
    assert_eq!(
        session.driver().last_receive_timeout(),
        Some(Duration::from_millis(100))
    );
    assert_eq!(session.driver().configured(), Some((38_400, OutputMode::Rtcm)));

    // Publications in order: fix, fix, satellite count.
    match rx.try_recv().unwrap() {
        BridgeEvent::Fix(fix) => {
            assert_eq!(fix.status, FixStatus::Fix);
            assert_eq!(fix.latitude, 50.8503);
            assert_eq!(fix.position_covariance[0], f64::from(0.9f32));
            assert_eq!(fix.position_covariance[8], f64::from(1.4f32));
        }
        other => panic!("expected first fix, got {other:?}"),
    }
    match rx.try_recv().unwrap() {
        BridgeEvent::Fix(fix) => assert_eq!(fix.status, FixStatus::AugmentedFix),
        other => panic!("expected second fix, got {other:?}"),
    }
    assert_eq!(rx.try_recv().unwrap(), BridgeEvent::Satellites { count: 9 });
    assert!(rx.try_recv().is_err());

    // The session slots hold the most recent reports.
    assert_eq!(session.last_position(), &second_fix);
    assert_eq!(session.last_satellites().map(|s| s.count), Some(9));
}

/// Correction bytes cross the bridge by copy: length and order preserved,
/// survey state observable afterwards.
#[test]
fn corrections_and_survey_flow_through() {
    let config = SessionConfig::new("X", 38_400);
    let rtcm = b"\xd3\x00\x06\x41\x90\x00\x45\x25\x9a";

    let mut driver = ScriptedDriver::new();
    driver.enqueue(
        ScriptStep::produce(RECEIVE_POSITION)
            .position(PositionReport {
                fix_type: 4,
                ..Default::default()
            })
            .corrections(rtcm)
            .survey(SurveyInStatus {
                duration: 75,
                mean_accuracy: 900,
                flags: 0b01,
            }),
    );

    let (mut session, _handle, rx) = build_session(&config, driver);
    let flag = session.run_flag();
    session.driver_mut().stop_when_exhausted(flag);

    assert_eq!(session.connect(), LinkState::Connected);
    session.run();

    // The correction event precedes the fix: it is forwarded from inside
    // the receive call, before the loop inspects the result bitmask.
    assert_eq!(
        rx.try_recv().unwrap(),
        BridgeEvent::Corrections(Bytes::copy_from_slice(rtcm))
    );
    assert!(matches!(rx.try_recv().unwrap(), BridgeEvent::Fix(_)));

    let survey = session.survey_status();
    assert_eq!(survey.duration, 75);
    assert_eq!(survey.mean_accuracy, 900);
    assert!(survey.valid());
    assert!(!survey.active());
}

/// Device I/O raised by the driver reaches the transport through the
/// bridge: injected bytes come back from a read step, written bytes land in
/// the loopback capture.
#[test]
fn driver_io_crosses_the_bridge() {
    let config = SessionConfig::new("X", 38_400);

    let mut driver = ScriptedDriver::new();
    driver.write_on_configure(b"\xb5\x62\x06\x8a");
    driver.enqueue(ScriptStep::produce(0).read(8).write(b"\xb5\x62\x06\x01"));

    let (mut session, handle, _rx) = build_session(&config, driver);
    let flag = session.run_flag();
    session.driver_mut().stop_when_exhausted(flag);

    assert_eq!(session.connect(), LinkState::Connected);
    handle.clear_written();
    handle.inject_rx(b"\xb5\x62\x01\x07\xde\xad\xbe\xef");

    session.run();

    assert_eq!(session.driver().last_read(), b"\xb5\x62\x01\x07\xde\xad\xbe\xef");
    assert_eq!(handle.written(), b"\xb5\x62\x06\x8a\xb5\x62\x06\x01");
}

/// Connector properties over the full stack: success on the fifth attempt
/// configures the requested rate; five failures leave the link down with no
/// receive traffic possible.
#[test]
fn connector_retry_policy() {
    let config = SessionConfig::new("X", 115_200);

    let (mut session, handle, _rx) = build_session(&config, ScriptedDriver::new());
    for _ in 0..4 {
        handle.fail_next_open(false);
    }
    assert_eq!(session.connect(), LinkState::Connected);
    assert_eq!(handle.baud_rate(), 115_200);

    let (mut session, handle, _rx) = build_session(&config, ScriptedDriver::new());
    for _ in 0..5 {
        handle.fail_next_open(false);
    }
    assert_eq!(session.connect(), LinkState::NotConnected);
    assert!(handle.config_calls().is_empty());
    assert!(!session.connection().port_open);
}
