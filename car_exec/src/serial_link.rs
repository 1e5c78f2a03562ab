//! # Serial Link
//!
//! The serial link owns the connection to the drive microcontroller. Commands are a single byte,
//! each answered by a single reply byte read within a short, bounded window.
//!
//! The link works in one of two modes:
//! - Direct: the link reads the reply itself from the port.
//! - Demux: a [`TmReader`] has been attached and owns the inbound side of the connection. The link
//!   arms an "awaiting reply" window before writing, and the reader hands over the first reply byte
//!   it sees while that window is open. Reply bytes outside the window are dropped by the reader,
//!   so a late reply is never attributed to the next command.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;

use comms_if::{
    cmd::{Ack, Command},
    serial::{SerialTransport, Transport, TransportError},
};
use log::{debug, error, info, trace, warn};
use serde::Deserialize;
use util::time::secs_to_duration;

use crate::tm_reader::{TmParams, TmReader};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the serial link.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkParams {
    /// Serial device path
    pub port: String,

    /// Baud rate of the device
    pub baud: u32,

    /// Time to wait after opening the port for the device to finish resetting
    pub settle_time_s: f64,

    /// Time between writing a command and reading its reply
    pub ack_delay_s: f64,

    /// Maximum time to wait for a reply byte
    pub read_timeout_s: f64,
}

/// Connection to the drive microcontroller.
pub struct SerialLink {
    transport: Box<dyn Transport>,

    params: LinkParams,

    /// Present once a telemetry reader has taken over the inbound side of the connection
    demux: Option<ReplyChannel>,
}

/// Link side of the reply hand-over with the telemetry reader.
struct ReplyChannel {
    awaiting: Arc<AtomicBool>,
    receiver: Receiver<u8>,
}

/// Reader side of the reply hand-over with the link.
pub(crate) struct ReplySender {
    awaiting: Arc<AtomicBool>,
    sender: Sender<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur on the [`SerialLink`].
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Could not connect to the device: {0}")]
    ConnectionFault(TransportError),

    #[error("I/O fault while sending '{0}': {1}")]
    IoError(Command, TransportError),

    #[error("A telemetry reader is already attached to the link")]
    TmAlreadyAttached,

    #[error("Could not start the telemetry reader thread: {0}")]
    TmSpawnError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            port: String::from("/dev/ttyACM0"),
            baud: 115200,
            settle_time_s: 2.0,
            ack_delay_s: 0.05,
            read_timeout_s: 1.0,
        }
    }
}

impl SerialLink {
    /// Open the serial device given in the parameters.
    ///
    /// Blocks for the settle time while the device resets. Any failure here is a connection fault,
    /// no retry is attempted.
    pub fn connect(params: &LinkParams) -> Result<Self, LinkError> {
        let transport = SerialTransport::open(
            &params.port,
            params.baud,
            secs_to_duration(params.read_timeout_s),
        )
        .map_err(LinkError::ConnectionFault)?;

        Self::with_transport(Box::new(transport), params)
    }

    /// Build a link over an already open transport.
    ///
    /// Waits for the settle time then discards everything already received, such as the boot
    /// banner, so that it cannot be mistaken for a reply.
    pub fn with_transport(
        mut transport: Box<dyn Transport>,
        params: &LinkParams,
    ) -> Result<Self, LinkError> {
        debug!(
            "Waiting {:.2} s for {} to settle",
            params.settle_time_s,
            transport.name()
        );
        thread::sleep(secs_to_duration(params.settle_time_s));

        match transport.available() {
            Ok(0) => (),
            Ok(n) => debug!("Discarding {} bytes of startup output", n),
            Err(e) => warn!("Could not check for startup output: {}", e),
        }
        transport
            .clear_input()
            .map_err(LinkError::ConnectionFault)?;

        info!(
            "Connected to microcontroller on {} @ {}",
            transport.name(),
            params.baud
        );

        Ok(Self {
            transport,
            params: params.clone(),
            demux: None,
        })
    }

    /// Send a command and classify the device's reply.
    ///
    /// Never blocks for longer than the ack delay plus the read timeout. Momentary transport errors
    /// are reported as [`Ack::NoResponse`], any other transport error is returned as
    /// [`LinkError::IoError`] for the caller to judge.
    pub fn send_command(&mut self, cmd: Command) -> Result<Ack, LinkError> {
        let reply = match self.exchange(cmd) {
            Ok(r) => r,
            Err(e) if e.is_transient() => {
                warn!("Transient serial error while sending '{}': {}", cmd, e);
                None
            }
            Err(e) => {
                error!("Serial fault while sending '{}': {}", cmd, e);
                return Err(LinkError::IoError(cmd, e));
            }
        };

        let ack = Ack::from_reply(reply);

        match ack {
            Ack::Acked => info!("[serial] '{}' -> ACK", cmd),
            Ack::Rejected => warn!("[serial] '{}' -> REJECTED, device did not recognise it", cmd),
            Ack::NoResponse(_) => warn!("[serial] '{}' -> {}", cmd, ack),
        }

        Ok(ack)
    }

    /// Start a telemetry reader on a second handle to this connection.
    ///
    /// From this point on replies are received through the reader.
    pub fn attach_telemetry(&mut self, params: &TmParams) -> Result<TmReader, LinkError> {
        if self.demux.is_some() {
            return Err(LinkError::TmAlreadyAttached);
        }

        let reader_transport = self
            .transport
            .try_clone()
            .map_err(LinkError::ConnectionFault)?;

        let awaiting = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::channel();

        let reader = TmReader::start(
            reader_transport,
            params.clone(),
            ReplySender {
                awaiting: awaiting.clone(),
                sender,
            },
        )
        .map_err(LinkError::TmSpawnError)?;

        self.demux = Some(ReplyChannel { awaiting, receiver });

        info!("Telemetry reader attached to {}", self.transport.name());

        Ok(reader)
    }

    /// Name of the underlying connection.
    pub fn name(&self) -> &str {
        self.transport.name()
    }

    /// Release the connection.
    ///
    /// Any attached telemetry reader must have been stopped first.
    pub fn close(self) {
        info!("Closing connection to {}", self.transport.name());
    }

    /// Write the command byte and wait for at most one reply byte.
    fn exchange(&mut self, cmd: Command) -> Result<Option<u8>, TransportError> {
        let ack_delay = secs_to_duration(self.params.ack_delay_s);

        match self.demux {
            None => {
                // Anything still unread belongs to an earlier exchange
                if self.transport.available()? > 0 {
                    trace!("Dropping stale input before sending '{}'", cmd);
                    self.transport.clear_input()?;
                }

                self.transport.write_all(&[cmd.to_byte()])?;
                thread::sleep(ack_delay);
                self.transport.read_byte()
            }
            Some(ref chan) => {
                while let Ok(b) = chan.receiver.try_recv() {
                    trace!("Dropping stale reply {:?}", b as char);
                }

                chan.awaiting.store(true, Ordering::SeqCst);

                if let Err(e) = self.transport.write_all(&[cmd.to_byte()]) {
                    chan.awaiting.store(false, Ordering::SeqCst);
                    return Err(e);
                }

                thread::sleep(ack_delay);

                let reply = chan
                    .receiver
                    .recv_timeout(secs_to_duration(self.params.read_timeout_s));

                chan.awaiting.store(false, Ordering::SeqCst);

                match reply {
                    Ok(b) => Ok(Some(b)),
                    Err(RecvTimeoutError::Timeout) => Ok(None),
                    Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
                }
            }
        }
    }
}

impl ReplySender {
    /// Hand a reply byte to the link if it is waiting for one.
    ///
    /// Returns false if the link was not waiting, in which case the byte is dropped.
    pub(crate) fn offer(&self, byte: u8) -> bool {
        if self.awaiting.swap(false, Ordering::SeqCst) {
            self.sender.send(byte).is_ok()
        }
        else {
            false
        }
    }

    /// True while the link is waiting for a reply.
    pub(crate) fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::SeqCst)
    }
}
