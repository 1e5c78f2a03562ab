//! # Telemetry Reader
//!
//! Background thread draining inbound serial data while the control loop keeps sending commands.
//! Inbound bytes are split by a small state machine ([`LineClassifier`]):
//!
//! - A reply byte (`A` or `E`) at the start of a line is a command reply. It is handed to the
//!   [`SerialLink`](crate::serial_link::SerialLink) if a reply is awaited, otherwise dropped.
//! - While a reply is awaited, any other byte at the start of a line which cannot begin a
//!   telemetry line is also handed over, so the link reports what the device actually answered.
//! - Anything else is accumulated into a line and parsed as a [`TelemetryRecord`] on `\n`.
//!
//! Read errors are never fatal to the reader, it pauses and tries again.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use comms_if::{
    cmd::Ack,
    serial::Transport,
    tm::{TelemetryRecord, TmParseError, FRONT_DISTANCE_PREFIX, LINE_TERMINATOR},
};
use log::{debug, error, info, warn};
use serde::Deserialize;
use util::time::secs_to_duration;

use crate::serial_link::ReplySender;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Size of the buffer used for each read from the transport.
const READ_BUFFER_SIZE: usize = 64;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TmParams {
    /// Time to sleep when no input is pending
    pub poll_interval_s: f64,

    /// Time to pause after a read error before trying again
    pub error_backoff_s: f64,

    /// Lines longer than this are discarded
    pub max_line_len: usize,
}

/// The most recent telemetry record and when it was received.
#[derive(Debug, Copy, Clone)]
pub struct TmSample {
    pub record: TelemetryRecord,
    pub received: Instant,
}

/// Handle onto the running telemetry reader thread.
///
/// Dropping the handle stops the thread and waits for it to exit.
pub struct TmReader {
    handle: Option<JoinHandle<()>>,

    stop: Arc<AtomicBool>,

    latest: Arc<Mutex<Option<TmSample>>>,

    num_records: Arc<AtomicU64>,
}

/// Splits inbound bytes into command replies and telemetry lines.
#[derive(Debug)]
pub struct LineClassifier {
    line: Vec<u8>,
    max_line_len: usize,
    overflowed: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// An item recognised by the [`LineClassifier`].
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// A command reply byte
    Reply(u8),

    /// A complete, valid telemetry line
    Record(TelemetryRecord),

    /// A complete line which could not be parsed
    Invalid(TmParseError),

    /// A line exceeding the maximum length, discarded
    Overflow,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for TmParams {
    fn default() -> Self {
        Self {
            poll_interval_s: 0.02,
            error_backoff_s: 0.1,
            max_line_len: 32,
        }
    }
}

impl TmReader {
    /// Spawn the reader thread on the given transport handle.
    pub(crate) fn start(
        transport: Box<dyn Transport>,
        params: TmParams,
        replies: ReplySender,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let latest = Arc::new(Mutex::new(None));
        let num_records = Arc::new(AtomicU64::new(0));

        let handle = {
            let stop = stop.clone();
            let latest = latest.clone();
            let num_records = num_records.clone();

            thread::Builder::new()
                .name("tm_reader".into())
                .spawn(move || {
                    reader_loop(transport, params, replies, stop, latest, num_records)
                })?
        };

        Ok(Self {
            handle: Some(handle),
            stop,
            latest,
            num_records,
        })
    }

    /// The most recent telemetry sample, if any has been received.
    pub fn latest(&self) -> Option<TmSample> {
        match self.latest.lock() {
            Ok(l) => *l,
            Err(_) => None,
        }
    }

    /// Number of valid telemetry records received so far.
    pub fn num_records(&self) -> u64 {
        self.num_records.load(Ordering::Relaxed)
    }

    /// Stop the reader and wait for the thread to exit.
    pub fn stop(self) {
        // Joined in drop
    }
}

impl Drop for TmReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Telemetry reader thread panicked");
            }
        }
    }
}

impl LineClassifier {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            line: Vec::with_capacity(max_line_len),
            max_line_len,
            overflowed: false,
        }
    }

    /// Feed one inbound byte, returning the item it completes, if any.
    ///
    /// `reply_awaited` widens what counts as a reply at the start of a line to any byte other than
    /// the telemetry prefix or whitespace.
    pub fn push(&mut self, byte: u8, reply_awaited: bool) -> Option<Inbound> {
        if byte == LINE_TERMINATOR {
            return self.end_line();
        }

        if self.overflowed {
            return None;
        }

        if self.line.is_empty()
            && (Ack::is_reply_byte(byte) || (reply_awaited && !may_start_line(byte)))
        {
            return Some(Inbound::Reply(byte));
        }

        if self.line.len() >= self.max_line_len {
            self.overflowed = true;
            self.line.clear();
            return None;
        }

        self.line.push(byte);
        None
    }

    fn end_line(&mut self) -> Option<Inbound> {
        let item = if self.overflowed {
            Some(Inbound::Overflow)
        }
        else if self.line.iter().all(|b| b.is_ascii_whitespace()) {
            None
        }
        else {
            match TelemetryRecord::parse_line(&self.line) {
                Ok(r) => Some(Inbound::Record(r)),
                Err(e) => Some(Inbound::Invalid(e)),
            }
        };

        self.line.clear();
        self.overflowed = false;

        item
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn may_start_line(byte: u8) -> bool {
    FRONT_DISTANCE_PREFIX.as_bytes().first() == Some(&byte) || byte.is_ascii_whitespace()
}

fn reader_loop(
    mut transport: Box<dyn Transport>,
    params: TmParams,
    replies: ReplySender,
    stop: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<TmSample>>>,
    num_records: Arc<AtomicU64>,
) {
    let poll_interval = secs_to_duration(params.poll_interval_s);
    let error_backoff = secs_to_duration(params.error_backoff_s);

    let mut classifier = LineClassifier::new(params.max_line_len);
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    info!("Telemetry reader started");

    while !stop.load(Ordering::Relaxed) {
        // Only read what is already there so that a stop request is noticed promptly
        let pending = match transport.available() {
            Ok(n) => n,
            Err(e) => {
                warn!("Telemetry read error: {}", e);
                thread::sleep(error_backoff);
                continue;
            }
        };

        if pending == 0 {
            thread::sleep(poll_interval);
            continue;
        }

        let num_read = match transport.read(&mut buffer[..pending.min(READ_BUFFER_SIZE)]) {
            Ok(n) => n,
            Err(e) => {
                warn!("Telemetry read error: {}", e);
                thread::sleep(error_backoff);
                continue;
            }
        };

        for &byte in &buffer[..num_read] {
            match classifier.push(byte, replies.is_awaiting()) {
                Some(Inbound::Reply(b)) => {
                    if !replies.offer(b) {
                        debug!("Unsolicited reply byte {:?} dropped", b as char);
                    }
                }
                Some(Inbound::Record(record)) => {
                    debug!("[tm] front distance {:.1} cm", record.front_distance_cm);

                    if let Ok(mut l) = latest.lock() {
                        *l = Some(TmSample {
                            record,
                            received: Instant::now(),
                        });
                    }
                    num_records.fetch_add(1, Ordering::Relaxed);
                }
                Some(Inbound::Invalid(e)) => debug!("[tm] discarded line: {}", e),
                Some(Inbound::Overflow) => debug!(
                    "[tm] discarded line longer than {} bytes",
                    params.max_line_len
                ),
                None => (),
            }
        }
    }

    info!("Telemetry reader exiting");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::serial_link::{LinkParams, SerialLink};
    use comms_if::{
        cmd::Command,
        serial::{MockTransport, SimDevice},
    };
    use std::time::Duration;

    fn feed(classifier: &mut LineClassifier, bytes: &[u8]) -> Vec<Inbound> {
        bytes.iter().filter_map(|b| classifier.push(*b, false)).collect()
    }

    fn feed_awaited(classifier: &mut LineClassifier, bytes: &[u8]) -> Vec<Inbound> {
        bytes.iter().filter_map(|b| classifier.push(*b, true)).collect()
    }

    fn fast_tm_params() -> TmParams {
        TmParams {
            poll_interval_s: 0.001,
            error_backoff_s: 0.001,
            ..Default::default()
        }
    }

    fn fast_link_params() -> LinkParams {
        LinkParams {
            settle_time_s: 0.0,
            ack_delay_s: 0.0,
            read_timeout_s: 0.5,
            ..Default::default()
        }
    }

    fn wait_for_records(reader: &TmReader, num: u64) -> bool {
        let start = Instant::now();
        while reader.num_records() < num {
            if start.elapsed() > Duration::from_secs(2) {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    #[test]
    fn test_classify_replies_and_lines() {
        let mut c = LineClassifier::new(32);

        assert_eq!(
            feed(&mut c, b"AD:42\nE"),
            vec![
                Inbound::Reply(b'A'),
                Inbound::Record(TelemetryRecord {
                    front_distance_cm: 42.0
                }),
                Inbound::Reply(b'E'),
            ]
        );

        // Reply bytes inside a line are part of the line
        assert!(matches!(
            feed(&mut c, b"DA:1\n").as_slice(),
            [Inbound::Invalid(_)]
        ));
    }

    #[test]
    fn test_classify_unexpected_reply() {
        let mut c = LineClassifier::new(32);

        // Nothing awaited, so an unknown byte starts a line
        assert!(matches!(feed(&mut c, b"Z\n").as_slice(), [Inbound::Invalid(_)]));

        // While awaited it is the device's answer, telemetry still passes through
        assert_eq!(
            feed_awaited(&mut c, b"\r\nD:7\nZ"),
            vec![
                Inbound::Record(TelemetryRecord {
                    front_distance_cm: 7.0
                }),
                Inbound::Reply(b'Z'),
            ]
        );

        // Only at the start of a line
        assert!(matches!(
            feed_awaited(&mut c, b"D:Z\n").as_slice(),
            [Inbound::Invalid(_)]
        ));
    }

    #[test]
    fn test_classify_split_lines() {
        let mut c = LineClassifier::new(32);

        assert!(feed(&mut c, b"D:1").is_empty());
        assert!(feed(&mut c, b"2.5").is_empty());
        assert_eq!(
            feed(&mut c, b"\r\n"),
            vec![Inbound::Record(TelemetryRecord {
                front_distance_cm: 12.5
            })]
        );

        // Empty lines produce nothing
        assert!(feed(&mut c, b"\n\r\n").is_empty());
    }

    #[test]
    fn test_classify_overflow() {
        let mut c = LineClassifier::new(8);

        assert_eq!(feed(&mut c, b"D:123456789A\n"), vec![Inbound::Overflow]);

        // Classifier recovers on the next line
        assert_eq!(
            feed(&mut c, b"D:5\n"),
            vec![Inbound::Record(TelemetryRecord {
                front_distance_cm: 5.0
            })]
        );
    }

    #[test]
    fn test_reader_surfaces_telemetry() {
        let mock = MockTransport::new();
        let mut link =
            SerialLink::with_transport(Box::new(mock.clone()), &fast_link_params()).unwrap();
        let reader = link.attach_telemetry(&fast_tm_params()).unwrap();

        mock.inject_read(b"D:30\nD:2");
        mock.inject_read(b"5\n");

        assert!(wait_for_records(&reader, 2));
        let latest = reader.latest().unwrap();
        assert_eq!(latest.record.front_distance_cm, 25.0);

        reader.stop();
        link.close();
    }

    #[test]
    fn test_reader_tolerates_read_errors() {
        let mock = MockTransport::new();
        let mut link =
            SerialLink::with_transport(Box::new(mock.clone()), &fast_link_params()).unwrap();
        let reader = link.attach_telemetry(&fast_tm_params()).unwrap();

        mock.fail_reads(5);
        mock.inject_read(b"D:9\n");

        assert!(wait_for_records(&reader, 1));
        reader.stop();
    }

    #[test]
    fn test_replies_routed_through_reader() {
        let mock = MockTransport::with_device(SimDevice::with_telemetry(40.0));
        let mut link =
            SerialLink::with_transport(Box::new(mock.clone()), &fast_link_params()).unwrap();
        let reader = link.attach_telemetry(&fast_tm_params()).unwrap();

        assert!(matches!(
            link.attach_telemetry(&fast_tm_params()),
            Err(crate::serial_link::LinkError::TmAlreadyAttached)
        ));

        for cmd in [Command::Right, Command::Right, Command::Stop].iter() {
            assert_eq!(link.send_command(*cmd).unwrap(), Ack::Acked);
        }

        assert!(wait_for_records(&reader, 3));
        assert_eq!(mock.written(), b"RRS".to_vec());

        reader.stop();
        link.close();
    }

    #[test]
    fn test_unsolicited_reply_dropped() {
        let mock = MockTransport::new();
        let mut link =
            SerialLink::with_transport(Box::new(mock.clone()), &fast_link_params()).unwrap();
        let reader = link.attach_telemetry(&fast_tm_params()).unwrap();

        // A late reply followed by a telemetry line, arriving while nothing is awaited
        mock.inject_read(b"AD:3\n");
        assert!(wait_for_records(&reader, 1));

        // The silent device never answers this one, the late byte must not be used
        assert_eq!(
            link.send_command(Command::Forward).unwrap(),
            Ack::NoResponse(None)
        );

        reader.stop();
    }

    #[test]
    fn test_unexpected_reply_reported() {
        let mock = MockTransport::with_device(|_b: u8| b"Z".to_vec());
        let mut link =
            SerialLink::with_transport(Box::new(mock.clone()), &fast_link_params()).unwrap();
        let reader = link.attach_telemetry(&fast_tm_params()).unwrap();

        assert_eq!(
            link.send_command(Command::Left).unwrap(),
            Ack::NoResponse(Some(b'Z'))
        );

        reader.stop();
        link.close();
    }
}
