//! # Serial port transport

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

use super::{Transport, TransportError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Transport over a real (or USB CDC) serial device.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,

    /// Device path, e.g. `/dev/ttyACM0`
    path: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SerialTransport {
    /// Open a serial port in 8N1 mode without flow control.
    ///
    /// `read_timeout` bounds every read made through this transport and any of its clones.
    pub fn open(path: &str, baud: u32, read_timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|e| TransportError::OpenError(path.into(), e))?;

        debug!("Opened {} at {} baud, read timeout {:?}", path, baud, read_timeout);

        Ok(Self {
            port,
            path: path.into(),
        })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn available(&mut self) -> Result<usize, TransportError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        Ok(self.port.clear(ClearBuffer::Input)?)
    }

    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(Self {
            port: self.port.try_clone()?,
            path: self.path.clone(),
        }))
    }

    fn name(&self) -> &str {
        &self.path
    }
}
