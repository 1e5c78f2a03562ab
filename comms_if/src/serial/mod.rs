//! # Serial Module
//!
//! This module provides the byte transport between the host and the drive microcontroller. The
//! [`Transport`] trait is implemented by [`SerialTransport`] for a real serial device and by
//! [`MockTransport`] for an in-memory simulated device used by tests and bench runs.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod mock;
mod port;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use mock::{Device, MockTransport, SimDevice};
pub use port::SerialTransport;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A bidirectional byte transport to the microcontroller.
pub trait Transport: Send {
    /// Read into `buffer`, returning the number of bytes read.
    ///
    /// Returns `Ok(0)` if no data arrived within the transport's read timeout, it must never
    /// block indefinitely.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `data` and flush it to the device.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Number of bytes which can be read without blocking.
    fn available(&mut self) -> Result<usize, TransportError>;

    /// Discard any received data which has not been read yet.
    fn clear_input(&mut self) -> Result<(), TransportError>;

    /// Create a second handle onto the same underlying connection.
    ///
    /// Used to give the telemetry reader its own read handle.
    fn try_clone(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Human readable name of the connection, for logs.
    fn name(&self) -> &str;

    /// Read at most one byte, `None` if nothing arrived before the read timeout.
    fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        let mut buf = [0u8; 1];
        match self.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur on a [`Transport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Could not open serial port {0}: {1}")]
    OpenError(String, serialport::Error),

    #[error("Serial I/O error: {0}")]
    IoError(std::io::Error),

    #[error("Serial port error: {0}")]
    PortError(serialport::Error),

    #[error("The connection has been closed")]
    Closed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TransportError {
    /// Returns true if the error is a momentary condition (timeout, interrupted call) rather than
    /// a fault on the connection.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::IoError(e)
    }
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        TransportError::PortError(e)
    }
}
