//! # Communications interface crate.
//!
//! Provides the interface between the host and the drive microcontroller: the single byte command
//! set, the acknowledgement replies, the telemetry lines streamed by the device, and the serial
//! transport they travel over.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Drive commands and their acknowledgements
pub mod cmd;

/// Telemetry lines reported by the microcontroller
pub mod tm;

/// Serial transport abstraction
pub mod serial;
