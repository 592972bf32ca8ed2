//! Serial port transport implementation

use super::{
    FrameSettings, SerialFlowControl, SerialParity, Transport, TransportError, TransportStats,
};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::trace;

/// Interval between readiness polls in [`Transport::wait_readable`].
const READABLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Serial port transport
///
/// Owns at most one open device handle; reopening requires the prior
/// handle to be released first, which `open` honors by reusing it.
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
    stats: TransportStats,
}

impl SerialTransport {
    /// Create a new serial transport for the named port. The device is not
    /// touched until [`Transport::open`] is called.
    #[must_use]
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port.to_string(),
            baud_rate,
            timeout: Duration::from_millis(100),
            port: None,
            stats: TransportStats::default(),
        }
    }

    fn map_open_error(&self, e: &serialport::Error) -> TransportError {
        match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(self.port_name.clone()),
            serialport::ErrorKind::Io(io_kind) => match io_kind {
                std::io::ErrorKind::PermissionDenied => {
                    TransportError::PermissionDenied(self.port_name.clone())
                }
                _ => TransportError::OpenFailed(e.to_string()),
            },
            serialport::ErrorKind::Unknown => TransportError::DeviceFault(e.to_string()),
            _ => TransportError::OpenFailed(e.to_string()),
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| self.map_open_error(&e))?;

        self.port = Some(port);
        self.stats = TransportStats::default();

        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.set_baud_rate(baud)
            .map_err(|e| TransportError::ConfigError(e.to_string()))?;
        self.baud_rate = baud;
        Ok(())
    }

    fn set_frame(&mut self, frame: FrameSettings) -> Result<(), TransportError> {
        let data_bits = match frame.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match frame.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match frame.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match frame.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        let config = |e: serialport::Error| TransportError::ConfigError(e.to_string());
        port.set_data_bits(data_bits).map_err(config)?;
        port.set_stop_bits(stop_bits).map_err(config)?;
        port.set_parity(parity).map_err(config)?;
        port.set_flow_control(flow_control).map_err(config)?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.set_timeout(timeout)
            .map_err(|e| TransportError::ConfigError(e.to_string()))?;
        self.timeout = timeout;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<u32, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.bytes_to_read()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))
    }

    fn wait_readable(&mut self, timeout: Duration) -> bool {
        // serialport has no poll primitive; sample the receive queue until
        // data shows up or the deadline passes.
        let deadline = Instant::now() + timeout;
        loop {
            match self.bytes_available() {
                Ok(n) if n > 0 => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(READABLE_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;

        match port.read(buf) {
            Ok(n) => {
                self.stats.bytes_received += n as u64;
                trace!(bytes = n, "serial read");
                Ok(n)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // No data within the configured timeout.
                Ok(0)
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(TransportError::Io(e))
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;

        let written = port.write(data).map_err(|e| {
            self.stats.errors += 1;
            TransportError::Io(e)
        })?;
        port.flush().map_err(TransportError::Io)?;

        self.stats.bytes_sent += written as u64;
        trace!(bytes = written, "serial write");
        Ok(written)
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }

    fn connection_info(&self) -> String {
        format!("{} @ {} baud", self.port_name, self.baud_rate)
    }
}
