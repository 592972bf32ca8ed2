//! Deterministic scripted driver
//!
//! Replays a programmed sequence of receive outcomes through the real
//! callback contract, so sessions can be exercised end-to-end without
//! receiver hardware and without any wire-format parsing. Each step may
//! update the driver-owned reports and raise bridge events (device reads
//! and writes, correction delivery, survey updates) before yielding its
//! scripted receive result.

use super::{
    DriverCallbacks, DriverError, DriverEvent, GnssDriver, OutputMode, PositionReport,
    SatelliteInfo, SurveyInStatus,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted `receive` call.
#[derive(Debug, Clone, Default)]
pub struct ScriptStep {
    result: i32,
    position: Option<PositionReport>,
    satellites: Option<SatelliteInfo>,
    corrections: Option<Vec<u8>>,
    survey: Option<SurveyInStatus>,
    read_len: Option<usize>,
    write: Option<Vec<u8>>,
    baud_switch: Option<u32>,
}

impl ScriptStep {
    /// Step yielding the given receive result.
    #[must_use]
    pub fn produce(result: i32) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    /// Overwrite the driver's position report before yielding.
    #[must_use]
    pub fn position(mut self, report: PositionReport) -> Self {
        self.position = Some(report);
        self
    }

    /// Overwrite the driver's satellite report before yielding.
    #[must_use]
    pub fn satellites(mut self, info: SatelliteInfo) -> Self {
        self.satellites = Some(info);
        self
    }

    /// Deliver correction bytes through the bridge before yielding.
    #[must_use]
    pub fn corrections(mut self, data: &[u8]) -> Self {
        self.corrections = Some(data.to_vec());
        self
    }

    /// Deliver a survey-in status update through the bridge before yielding.
    #[must_use]
    pub fn survey(mut self, status: SurveyInStatus) -> Self {
        self.survey = Some(status);
        self
    }

    /// Request a device read of `len` bytes through the bridge.
    #[must_use]
    pub fn read(mut self, len: usize) -> Self {
        self.read_len = Some(len);
        self
    }

    /// Write bytes to the device through the bridge.
    #[must_use]
    pub fn write(mut self, data: &[u8]) -> Self {
        self.write = Some(data.to_vec());
        self
    }

    /// Ask the bridge to switch the line rate.
    #[must_use]
    pub fn baud_switch(mut self, baud: u32) -> Self {
        self.baud_switch = Some(baud);
        self
    }
}

/// Scripted GNSS driver for tests and demos.
#[derive(Default)]
pub struct ScriptedDriver {
    steps: VecDeque<ScriptStep>,
    position: PositionReport,
    satellites: Option<SatelliteInfo>,
    configure_error: Option<String>,
    configure_writes: Option<Vec<u8>>,
    configured: Option<(u32, OutputMode)>,
    survey_specs: Option<(u32, u32)>,
    stop_flag: Option<Arc<AtomicBool>>,
    receive_calls: u32,
    last_receive_timeout: Option<Duration>,
    last_read: Vec<u8>,
    callback_returns: Vec<i32>,
}

impl ScriptedDriver {
    /// Create an empty driver; without steps every `receive` yields 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step to the script.
    pub fn enqueue(&mut self, step: ScriptStep) {
        self.steps.push_back(step);
    }

    /// Make `configure` fail with the given message.
    pub fn fail_configure(&mut self, message: &str) {
        self.configure_error = Some(message.to_string());
    }

    /// Bytes `configure` writes to the device, mimicking a receiver setup
    /// handshake.
    pub fn write_on_configure(&mut self, data: &[u8]) {
        self.configure_writes = Some(data.to_vec());
    }

    /// Clear this run flag once the script is exhausted, ending the session
    /// loop from the outside like a host shutdown would.
    pub fn stop_when_exhausted(&mut self, flag: Arc<AtomicBool>) {
        self.stop_flag = Some(flag);
    }

    /// Arguments of the last `configure` call, if any.
    #[must_use]
    pub fn configured(&self) -> Option<(u32, OutputMode)> {
        self.configured
    }

    /// Thresholds passed to `set_survey_specs`, if any.
    #[must_use]
    pub fn survey_specs(&self) -> Option<(u32, u32)> {
        self.survey_specs
    }

    /// Number of `receive` calls so far.
    #[must_use]
    pub fn receive_calls(&self) -> u32 {
        self.receive_calls
    }

    /// Timeout passed to the most recent `receive` call.
    #[must_use]
    pub fn last_receive_timeout(&self) -> Option<Duration> {
        self.last_receive_timeout
    }

    /// Bytes obtained by the most recent scripted device read.
    #[must_use]
    pub fn last_read(&self) -> &[u8] {
        &self.last_read
    }

    /// Bridge return values observed for every raised event, in order.
    #[must_use]
    pub fn callback_returns(&self) -> &[i32] {
        &self.callback_returns
    }
}

impl GnssDriver for ScriptedDriver {
    fn configure(
        &mut self,
        callbacks: &mut dyn DriverCallbacks,
        baud: u32,
        mode: OutputMode,
    ) -> Result<(), DriverError> {
        self.configured = Some((baud, mode));
        if let Some(message) = &self.configure_error {
            return Err(DriverError::ConfigurationFailed(message.clone()));
        }
        if let Some(data) = self.configure_writes.clone() {
            let ret = callbacks.on_event(DriverEvent::WriteDeviceData { data: &data });
            self.callback_returns.push(ret);
            if ret < 0 {
                return Err(DriverError::ConfigurationFailed(
                    "setup write rejected".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn receive(&mut self, callbacks: &mut dyn DriverCallbacks, timeout: Duration) -> i32 {
        self.receive_calls += 1;
        self.last_receive_timeout = Some(timeout);

        let Some(step) = self.steps.pop_front() else {
            if let Some(flag) = &self.stop_flag {
                flag.store(false, Ordering::Relaxed);
            }
            return 0;
        };

        if let Some(len) = step.read_len {
            let mut buf = vec![0u8; len];
            let ret = callbacks.on_event(DriverEvent::ReadDeviceData {
                buf: &mut buf,
                timeout,
            });
            self.callback_returns.push(ret);
            if ret > 0 {
                self.last_read = buf[..ret as usize].to_vec();
            }
        }
        if let Some(data) = &step.write {
            let ret = callbacks.on_event(DriverEvent::WriteDeviceData { data });
            self.callback_returns.push(ret);
        }
        if let Some(baud) = step.baud_switch {
            let ret = callbacks.on_event(DriverEvent::SetBaudRate { baud });
            self.callback_returns.push(ret);
        }
        if let Some(data) = &step.corrections {
            let ret = callbacks.on_event(DriverEvent::CorrectionReady { data });
            self.callback_returns.push(ret);
        }
        if let Some(status) = &step.survey {
            let ret = callbacks.on_event(DriverEvent::SurveyInStatus { status });
            self.callback_returns.push(ret);
        }
        if let Some(report) = step.position {
            self.position = report;
        }
        if let Some(info) = step.satellites {
            self.satellites = Some(info);
        }

        step.result
    }

    fn set_survey_specs(&mut self, accuracy_tenth_mm: u32, duration_s: u32) {
        self.survey_specs = Some((accuracy_tenth_mm, duration_s));
    }

    fn position(&self) -> &PositionReport {
        &self.position
    }

    fn satellite_info(&self) -> Option<&SatelliteInfo> {
        self.satellites.as_ref()
    }
}
