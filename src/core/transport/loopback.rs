//! In-memory loopback transport
//!
//! A transport whose device side is a pair of byte buffers driven through a
//! [`LoopbackHandle`]. Used by the test suite and the demos to stand in for
//! receiver hardware: the handle injects receive bytes, inspects written
//! bytes, and scripts open failures for connector exercises.

use super::{FrameSettings, Transport, TransportError, TransportStats};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Configuration calls observed by the loopback device, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCall {
    /// `set_frame` with the given shape
    Frame(FrameSettings),
    /// `set_baud_rate` with the given rate
    Baud(u32),
    /// `set_timeout` with the given duration
    Timeout(Duration),
}

/// Outcome scripted for a future `open` call.
#[derive(Debug, Clone, Copy)]
enum OpenOutcome {
    Fail,
    Fault,
}

#[derive(Default)]
struct Inner {
    open: bool,
    baud: u32,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    stats: TransportStats,
    scripted_opens: VecDeque<OpenOutcome>,
    config_calls: Vec<ConfigCall>,
    write_limit: Option<usize>,
}

/// Device-side handle to a [`LoopbackTransport`].
///
/// Cloneable; all clones observe the same buffers.
#[derive(Clone, Default)]
pub struct LoopbackHandle {
    inner: Arc<Mutex<Inner>>,
}

impl LoopbackHandle {
    /// Queue bytes that subsequent transport reads will return.
    pub fn inject_rx(&self, data: &[u8]) {
        self.inner.lock().rx.extend(data.iter().copied());
    }

    /// Bytes the bridge has written to the device so far.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().tx.clone()
    }

    /// Discard the captured written bytes.
    pub fn clear_written(&self) {
        self.inner.lock().tx.clear();
    }

    /// Script the next `open` call to fail. With `fault` set the failure is
    /// reported as the unexpected-fault class instead of an ordinary one.
    pub fn fail_next_open(&self, fault: bool) {
        let outcome = if fault {
            OpenOutcome::Fault
        } else {
            OpenOutcome::Fail
        };
        self.inner.lock().scripted_opens.push_back(outcome);
    }

    /// Cap the number of bytes a single write accepts, to exercise
    /// short-write handling. `None` removes the cap.
    pub fn limit_writes(&self, limit: Option<usize>) {
        self.inner.lock().write_limit = limit;
    }

    /// Whether the device side considers the port open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Line rate last configured on the device
    #[must_use]
    pub fn baud_rate(&self) -> u32 {
        self.inner.lock().baud
    }

    /// Configuration calls observed since creation, in order
    #[must_use]
    pub fn config_calls(&self) -> Vec<ConfigCall> {
        self.inner.lock().config_calls.clone()
    }
}

/// Loopback transport backed by shared in-memory buffers
pub struct LoopbackTransport {
    name: String,
    handle: LoopbackHandle,
}

impl LoopbackTransport {
    /// Create a loopback transport and the handle that drives its device
    /// side.
    #[must_use]
    pub fn new(name: &str) -> (Self, LoopbackHandle) {
        let handle = LoopbackHandle::default();
        (
            Self {
                name: name.to_string(),
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut inner = self.handle.inner.lock();
        if inner.open {
            return Ok(());
        }
        match inner.scripted_opens.pop_front() {
            Some(OpenOutcome::Fail) => Err(TransportError::OpenFailed(self.name.clone())),
            Some(OpenOutcome::Fault) => Err(TransportError::DeviceFault(self.name.clone())),
            None => {
                inner.open = true;
                Ok(())
            }
        }
    }

    fn close(&mut self) {
        self.handle.inner.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.handle.inner.lock().open
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        let mut inner = self.handle.inner.lock();
        if !inner.open {
            return Err(TransportError::NotOpen);
        }
        inner.baud = baud;
        inner.config_calls.push(ConfigCall::Baud(baud));
        Ok(())
    }

    fn set_frame(&mut self, frame: FrameSettings) -> Result<(), TransportError> {
        let mut inner = self.handle.inner.lock();
        if !inner.open {
            return Err(TransportError::NotOpen);
        }
        inner.config_calls.push(ConfigCall::Frame(frame));
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let mut inner = self.handle.inner.lock();
        if !inner.open {
            return Err(TransportError::NotOpen);
        }
        inner.config_calls.push(ConfigCall::Timeout(timeout));
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<u32, TransportError> {
        let inner = self.handle.inner.lock();
        if !inner.open {
            return Err(TransportError::NotOpen);
        }
        Ok(inner.rx.len() as u32)
    }

    fn wait_readable(&mut self, _timeout: Duration) -> bool {
        // Nothing arrives asynchronously on a loopback pair; either the
        // bytes were injected already or the wait times out.
        let inner = self.handle.inner.lock();
        inner.open && !inner.rx.is_empty()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut inner = self.handle.inner.lock();
        if !inner.open {
            return Err(TransportError::NotOpen);
        }
        let mut n = 0;
        while n < buf.len() {
            match inner.rx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        inner.stats.bytes_received += n as u64;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut inner = self.handle.inner.lock();
        if !inner.open {
            return Err(TransportError::NotOpen);
        }
        let accepted = match inner.write_limit {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };
        inner.tx.extend_from_slice(&data[..accepted]);
        inner.stats.bytes_sent += accepted as u64;
        Ok(accepted)
    }

    fn stats(&self) -> TransportStats {
        self.handle.inner.lock().stats
    }

    fn connection_info(&self) -> String {
        format!("loopback:{}", self.name)
    }
}
