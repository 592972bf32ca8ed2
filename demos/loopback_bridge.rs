//! Run a full session against an in-memory receiver.
//!
//! A scripted driver replays a short survey-in-to-fix sequence over the
//! loopback transport and the published events are printed as they drain
//! from the channel sink.
//!
//! ```sh
//! cargo run --example loopback_bridge
//! ```

use anyhow::Result;
use rtklink::{
    BridgeEvent, ChannelSink, GnssSession, LinkState, LoopbackTransport, PositionReport,
    SatelliteInfo, ScriptStep, ScriptedDriver, SessionConfig, SurveyInStatus, RECEIVE_POSITION,
    RECEIVE_SATELLITE,
};

fn scripted_receiver() -> ScriptedDriver {
    let base_position = PositionReport {
        lat: 50.850_340,
        lon: 4.351_710,
        alt: 56.4,
        eph: 1.2,
        epv: 1.9,
        hdop: 0.8,
        vdop: 1.1,
        fix_type: 3,
        satellites_used: 12,
        ..Default::default()
    };

    let mut driver = ScriptedDriver::new();

    // Survey-in still running.
    driver.enqueue(ScriptStep::produce(RECEIVE_POSITION).position(base_position).survey(
        SurveyInStatus {
            duration: 30,
            mean_accuracy: 2_400,
            flags: 0b10,
        },
    ));

    // A quiet cycle; the loop tolerates it.
    driver.enqueue(ScriptStep::produce(0));

    // Survey complete, corrections start flowing.
    driver.enqueue(
        ScriptStep::produce(RECEIVE_POSITION | RECEIVE_SATELLITE)
            .position(PositionReport {
                fix_type: 5,
                eph: 0.05,
                epv: 0.09,
                ..base_position
            })
            .satellites(SatelliteInfo {
                count: 17,
                ..Default::default()
            })
            .survey(SurveyInStatus {
                duration: 92,
                mean_accuracy: 860,
                flags: 0b01,
            })
            .corrections(b"\xd3\x00\x13\x3e\xd0\x00\x03\x8a\x28\xe9"),
    );

    driver
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .init();

    let config = SessionConfig::new("loop0", 38_400).survey_accuracy(0.1);
    let (transport, _handle) = LoopbackTransport::new(&config.port);
    let (sink, events) = ChannelSink::new();

    let mut session = GnssSession::new(
        &config,
        scripted_receiver(),
        Box::new(transport),
        Box::new(sink),
    );
    let flag = session.run_flag();
    session.driver_mut().stop_when_exhausted(flag);

    if session.connect() != LinkState::Connected {
        anyhow::bail!("receiver link did not come up");
    }

    let end = session.run();
    println!("session ended: {end:?}");

    for event in events.try_iter() {
        match event {
            BridgeEvent::Fix(fix) => println!(
                "fix    {:?} lat {:.6} lon {:.6} alt {:.1}",
                fix.status, fix.latitude, fix.longitude, fix.altitude
            ),
            BridgeEvent::Satellites { count } => println!("sats   {count} visible"),
            BridgeEvent::Corrections(data) => println!("rtcm   {} bytes", data.len()),
        }
    }

    let survey = session.survey_status();
    println!(
        "survey {} s, mean accuracy {} mm, valid {}, active {}",
        survey.duration,
        survey.mean_accuracy,
        survey.valid(),
        survey.active()
    );

    Ok(())
}
