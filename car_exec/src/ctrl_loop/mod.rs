//! # Control Loop
//!
//! The control loop repeatedly asks the perception adapter for a decision and forwards it to the
//! microcontroller over the serial link. How the car behaves between decisions is set by the
//! [`LoopPolicy`]:
//!
//! - `StopAndThink` - stop, capture, decide, drive for `drive_duration_s` then repeat.
//! - `FreeRun` - keep moving while the next frame is captured and decided on.
//! - `ContinuousGoal` - as `FreeRun`, with the telemetry reader streaming sensor data alongside.
//!
//! The loop always sends `Stop` before its first decision and again when it exits, whatever the
//! reason for the exit.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod policy;
mod stats;
mod timer;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use comms_if::cmd::{Ack, Command};
use log::{debug, error, info, warn};
use util::time::secs_to_duration;

pub use params::CtrlParams;
pub use policy::{LoopPolicy, LoopState, PolicyParseError};
pub use stats::LoopStats;
pub use timer::{ThreadTimer, Timer};

use crate::{
    perception::Perception,
    serial_link::{LinkError, SerialLink},
    tm_reader::{TmParams, TmReader},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The perceive, decide, act loop.
pub struct ControlLoop<P, T> {
    link: SerialLink,

    perception: P,

    params: CtrlParams,

    tm_params: TmParams,

    timer: T,

    /// Cleared by the interrupt handler to request a shutdown
    running: Arc<AtomicBool>,

    state: LoopState,

    stats: LoopStats,

    /// Number of command I/O faults since the last successful send
    num_consec_faults: u32,

    /// True while the last command sent was an acknowledged `Stop`
    held_stationary: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("Connection to the microcontroller lost: {fault}")]
    ConnectionLost { fault: LinkError, stats: LoopStats },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<P: Perception, T: Timer> ControlLoop<P, T> {
    pub fn new(
        link: SerialLink,
        perception: P,
        params: CtrlParams,
        tm_params: TmParams,
        timer: T,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            link,
            perception,
            params,
            tm_params,
            timer,
            running,
            state: LoopState::Stopped,
            stats: LoopStats::default(),
            num_consec_faults: 0,
            held_stationary: false,
        }
    }

    /// Run until interrupted, until `max_cycles` is reached, or until the connection is lost.
    ///
    /// The link is closed on return.
    pub fn run(mut self) -> Result<LoopStats, LoopError> {
        info!(
            "Control loop starting with policy {} on {}",
            self.params.policy,
            self.link.name()
        );

        let tm_reader = if self.params.policy.starts_telemetry() {
            match self.link.attach_telemetry(&self.tm_params) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("Continuing without telemetry: {}", e);
                    None
                }
            }
        }
        else {
            None
        };

        let outcome = self.drive(tm_reader.as_ref());

        // ---- SHUTDOWN ----

        info!("Control loop stopping, sending final stop");
        if let Err(e) = self.send(Command::Stop) {
            error!("Final stop could not be sent: {}", e);
        }
        self.set_state(LoopState::Stopped);

        if let Some(r) = tm_reader {
            self.stats.tm_records = r.num_records();
            r.stop();
        }

        let stats = self.stats;
        self.link.close();

        info!(
            "Control loop finished after {} cycles ({} acked, {} rejected, {} unanswered, {} \
             link faults)",
            stats.num_cycles,
            stats.num_acked,
            stats.num_rejected,
            stats.num_no_response,
            stats.link_faults
        );

        match outcome {
            Ok(()) => Ok(stats),
            Err(fault) => Err(LoopError::ConnectionLost { fault, stats }),
        }
    }

    fn drive(&mut self, tm_reader: Option<&TmReader>) -> Result<(), LinkError> {
        // Make sure the car is halted before anything is decided
        self.send(Command::Stop)?;
        self.set_state(LoopState::Stopped);

        loop {
            if !self.is_running() {
                info!("Shutdown requested");
                return Ok(());
            }

            if let Some(max) = self.params.max_cycles {
                if self.stats.num_cycles >= max {
                    info!("Reached the maximum of {} cycles", max);
                    return Ok(());
                }
            }

            self.stats.num_cycles += 1;
            debug!("---- CYCLE {} ----", self.stats.num_cycles);

            self.cycle(tm_reader)?;
        }
    }

    fn cycle(&mut self, tm_reader: Option<&TmReader>) -> Result<(), LinkError> {
        if self.params.policy.stops_before_capture() {
            self.send(Command::Stop)?;
            self.set_state(LoopState::Stopped);
        }

        // ---- PERCEPTION ----

        if !self.is_running() {
            return Ok(());
        }
        self.set_state(LoopState::Deciding);

        let frame = match self.perception.capture() {
            Ok(f) => f,
            Err(e) => {
                error!("Capture failed: {}", e);
                self.stats.capture_faults += 1;
                return self.recover();
            }
        };

        if !self.is_running() {
            return Ok(());
        }

        let cmd = match self.perception.infer(&frame) {
            Ok(c) => c,
            Err(e) => {
                error!("Inference failed: {}", e);
                self.stats.inference_faults += 1;
                return self.recover();
            }
        };

        info!("Decision: '{}'", cmd);
        self.stats.last_goal = Some(cmd);

        // ---- COMMAND ----

        if !self.is_running() {
            return Ok(());
        }
        self.set_state(LoopState::Commanding);

        self.send(cmd)?;
        self.set_state(if cmd.is_motion() {
            LoopState::Driving
        }
        else {
            LoopState::Stopped
        });

        if let Some(r) = tm_reader {
            match r.latest() {
                Some(s) => info!(
                    "Front distance {:.1} cm ({:.2} s old)",
                    s.record.front_distance_cm,
                    s.received.elapsed().as_secs_f64()
                ),
                None => info!("No telemetry received yet"),
            }
        }

        // A shutdown request skips the wait, the final stop follows straight away
        if let Some(wait) = self.params.policy.post_send_wait(cmd, &self.params) {
            if self.is_running() {
                self.timer.sleep(wait);
            }
        }

        Ok(())
    }

    /// Recover from a capture or inference failure.
    fn recover(&mut self) -> Result<(), LinkError> {
        if self.params.policy.stops_on_fault() {
            if self.held_stationary {
                debug!("Car already stopped, no safety stop needed");
            }
            else {
                warn!("Sending safety stop");
                self.stats.safety_stops += 1;
                self.send(Command::Stop)?;
            }
            self.set_state(LoopState::Stopped);
        }
        else {
            match self.stats.last_goal {
                Some(g) => warn!("Keeping last goal '{}'", g),
                None => warn!("No goal yet, car remains stopped"),
            }
        }

        if self.is_running() {
            self.timer
                .sleep(secs_to_duration(self.params.recovery_delay_s));
        }

        Ok(())
    }

    /// Send a command, tracking consecutive I/O faults.
    ///
    /// Faults are tolerated until more than `max_consec_faults` happen in a row.
    fn send(&mut self, cmd: Command) -> Result<(), LinkError> {
        match self.link.send_command(cmd) {
            Ok(ack) => {
                self.num_consec_faults = 0;
                self.held_stationary = cmd == Command::Stop && ack == Ack::Acked;
                self.stats.record_send(cmd, Some(ack));
                Ok(())
            }
            Err(e) => {
                self.num_consec_faults += 1;
                self.held_stationary = false;
                self.stats.record_send(cmd, None);

                if self.num_consec_faults > self.params.max_consec_faults {
                    error!(
                        "{} consecutive command faults, connection considered lost",
                        self.num_consec_faults
                    );
                    Err(e)
                }
                else {
                    warn!(
                        "Command fault {} of {} tolerated: {}",
                        self.num_consec_faults, self.params.max_consec_faults, e
                    );
                    Ok(())
                }
            }
        }
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state != state {
            debug!("Loop state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl LoopError {
    /// Statistics of the run up to the error.
    pub fn stats(&self) -> &LoopStats {
        match self {
            LoopError::ConnectionLost { stats, .. } => stats,
        }
    }
}
