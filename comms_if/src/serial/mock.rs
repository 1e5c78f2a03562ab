//! # Mock transport
//!
//! In-memory transport standing in for the microcontroller. Clones of a [`MockTransport`] share the
//! same buffers, in the same way that clones of a serial port share the same device.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Transport, TransportError};
use crate::cmd::{Command, ACK_BYTE, REJECT_BYTE};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Behaviour of a simulated device attached to a [`MockTransport`].
pub trait Device: Send {
    /// Called for every byte written by the host, returns the bytes the device sends back.
    fn on_byte(&mut self, byte: u8) -> Vec<u8>;
}

impl<F> Device for F
where
    F: FnMut(u8) -> Vec<u8> + Send,
{
    fn on_byte(&mut self, byte: u8) -> Vec<u8> {
        self(byte)
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A simulated drive microcontroller following the reference firmware protocol.
///
/// Replies `A` to each of `F B L R S` and `E` to anything else. If a front distance is set, a
/// `D:<distance>` telemetry line is sent after every reply.
#[derive(Debug, Default, Clone)]
pub struct SimDevice {
    pub front_distance_cm: Option<f64>,
}

/// In-memory transport.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    name: String,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    written: Vec<u8>,
    device: Option<Box<dyn Device>>,
    write_fault: Option<ErrorKind>,
    read_faults: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimDevice {
    /// Banner printed by the firmware after a reset.
    pub const BANNER: &'static [u8] = b"Robot Ready...\n";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_telemetry(front_distance_cm: f64) -> Self {
        Self {
            front_distance_cm: Some(front_distance_cm),
        }
    }
}

impl Device for SimDevice {
    fn on_byte(&mut self, byte: u8) -> Vec<u8> {
        let mut out = match Command::from_byte(byte) {
            Some(_) => vec![ACK_BYTE],
            None => vec![REJECT_BYTE],
        };

        if let Some(d) = self.front_distance_cm {
            out.extend_from_slice(format!("D:{}\n", d).as_bytes());
        }

        out
    }
}

impl MockTransport {
    /// Create a transport with no device attached, writes are recorded but never answered.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                written: Vec::new(),
                device: None,
                write_fault: None,
                read_faults: 0,
            })),
            name: String::from("mock"),
        }
    }

    /// Create a transport answered by the given device.
    pub fn with_device<D: Device + 'static>(device: D) -> Self {
        let transport = Self::new();
        transport.lock().device = Some(Box::new(device));
        transport
    }

    /// Queue bytes to be read by the host, as if sent by the device.
    pub fn inject_read(&self, data: &[u8]) {
        self.lock().read_buffer.extend(data);
    }

    /// All bytes written by the host so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Make every subsequent write fail with the given error kind, or succeed again with `None`.
    pub fn set_write_fault(&self, fault: Option<ErrorKind>) {
        self.lock().write_fault = fault;
    }

    /// Make the next `num` reads (or availability checks) fail.
    pub fn fail_reads(&self, num: usize) {
        self.lock().read_faults = num;
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        // A poisoned mock just means a test thread panicked, the buffers are still usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_read_fault(inner: &mut MockTransportInner) -> Result<(), TransportError> {
        if inner.read_faults > 0 {
            inner.read_faults -= 1;
            return Err(Error::new(ErrorKind::Other, "simulated read fault").into());
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        let mut inner = self.lock();
        Self::take_read_fault(&mut inner)?;

        let num = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..num)) {
            *slot = byte;
        }

        Ok(num)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if let Some(kind) = inner.write_fault {
            return Err(Error::new(kind, "simulated write fault").into());
        }

        inner.written.extend_from_slice(data);

        let mut replies = Vec::new();
        if let Some(device) = inner.device.as_mut() {
            for &b in data {
                replies.extend(device.on_byte(b));
            }
        }
        inner.read_buffer.extend(replies);

        Ok(())
    }

    fn available(&mut self) -> Result<usize, TransportError> {
        let mut inner = self.lock();
        Self::take_read_fault(&mut inner)?;
        Ok(inner.read_buffer.len())
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.lock().read_buffer.clear();
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(self.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
