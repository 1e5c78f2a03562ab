//! Control loop parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use super::LoopPolicy;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CtrlParams {
    /// Driving policy
    pub policy: LoopPolicy,

    /// Time spent driving after a motion command in stop and think
    pub drive_duration_s: f64,

    /// Delay between cycles in free run and continuous goal
    pub cycle_delay_s: f64,

    /// Pause after a capture or inference failure
    pub recovery_delay_s: f64,

    /// Number of consecutive command I/O faults tolerated before the connection is considered
    /// lost
    pub max_consec_faults: u32,

    /// Stop after this many perception cycles
    pub max_cycles: Option<u64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for CtrlParams {
    fn default() -> Self {
        Self {
            policy: LoopPolicy::default(),
            drive_duration_s: 0.5,
            cycle_delay_s: 0.2,
            recovery_delay_s: 1.0,
            max_consec_faults: 5,
            max_cycles: None,
        }
    }
}
