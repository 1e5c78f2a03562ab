//! # Car library.
//!
//! This library allows the executables in the car crate, and the integration tests, to access the
//! components of the car's control software.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Control loop - turns perception decisions into drive commands according to a policy
pub mod ctrl_loop;

/// Parameters for the car executable
pub mod params;

/// Perception adapter - captures a frame and asks the vision service for a decision
pub mod perception;

/// Serial link - sends single byte commands to the microcontroller and classifies the replies
pub mod serial_link;

/// Telemetry reader - background thread receiving the microcontroller's telemetry lines
pub mod tm_reader;
