//! Control loop policies and loop states.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;

use comms_if::cmd::Command;
use serde::{Deserialize, Serialize};
use util::time::secs_to_duration;

use super::CtrlParams;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How the car is driven between perception cycles.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPolicy {
    /// Halt, look, decide, then drive for a fixed time.
    StopAndThink,

    /// Keep moving while the next frame is taken.
    FreeRun,

    /// The last decision stands until a new one arrives, with telemetry streamed alongside.
    ContinuousGoal,
}

/// Phase of a control cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Deciding,
    Commanding,
    Driving,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown loop policy {0:?}, expected one of stop_and_think, free_run, continuous_goal")]
pub struct PolicyParseError(String);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LoopPolicy {
    /// True if the car must be stopped before each capture.
    pub fn stops_before_capture(self) -> bool {
        matches!(self, LoopPolicy::StopAndThink)
    }

    /// True if a perception fault triggers a safety stop.
    pub fn stops_on_fault(self) -> bool {
        !matches!(self, LoopPolicy::ContinuousGoal)
    }

    /// True if the telemetry reader runs alongside the loop.
    pub fn starts_telemetry(self) -> bool {
        matches!(self, LoopPolicy::ContinuousGoal)
    }

    /// Wait after sending `cmd`, if any.
    pub fn post_send_wait(self, cmd: Command, params: &CtrlParams) -> Option<Duration> {
        match self {
            LoopPolicy::StopAndThink if cmd.is_motion() => {
                Some(secs_to_duration(params.drive_duration_s))
            }
            LoopPolicy::StopAndThink => None,
            LoopPolicy::FreeRun | LoopPolicy::ContinuousGoal => {
                Some(secs_to_duration(params.cycle_delay_s))
            }
        }
    }
}

impl Default for LoopPolicy {
    fn default() -> Self {
        LoopPolicy::StopAndThink
    }
}

impl Display for LoopPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopPolicy::StopAndThink => "stop_and_think",
            LoopPolicy::FreeRun => "free_run",
            LoopPolicy::ContinuousGoal => "continuous_goal",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for LoopPolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "stop_and_think" => Ok(LoopPolicy::StopAndThink),
            "free_run" => Ok(LoopPolicy::FreeRun),
            "continuous_goal" => Ok(LoopPolicy::ContinuousGoal),
            _ => Err(PolicyParseError(s.to_string())),
        }
    }
}

impl Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("stop_and_think".parse(), Ok(LoopPolicy::StopAndThink));
        assert_eq!("free-run".parse(), Ok(LoopPolicy::FreeRun));
        assert_eq!("Continuous_Goal".parse(), Ok(LoopPolicy::ContinuousGoal));
        assert!("sprint".parse::<LoopPolicy>().is_err());

        for p in [
            LoopPolicy::StopAndThink,
            LoopPolicy::FreeRun,
            LoopPolicy::ContinuousGoal,
        ]
        .iter()
        {
            assert_eq!(p.to_string().parse(), Ok(*p));
        }
    }

    #[test]
    fn test_post_send_wait() {
        let params = CtrlParams {
            drive_duration_s: 0.5,
            cycle_delay_s: 0.2,
            ..Default::default()
        };

        let sat = LoopPolicy::StopAndThink;
        assert_eq!(
            sat.post_send_wait(Command::Left, &params),
            Some(Duration::from_millis(500))
        );
        assert_eq!(sat.post_send_wait(Command::Stop, &params), None);

        for p in [LoopPolicy::FreeRun, LoopPolicy::ContinuousGoal].iter() {
            assert_eq!(
                p.post_send_wait(Command::Stop, &params),
                Some(Duration::from_millis(200))
            );
        }
    }

    #[test]
    fn test_policy_behaviour() {
        assert!(LoopPolicy::StopAndThink.stops_before_capture());
        assert!(!LoopPolicy::FreeRun.stops_before_capture());
        assert!(LoopPolicy::FreeRun.stops_on_fault());
        assert!(!LoopPolicy::ContinuousGoal.stops_on_fault());
        assert!(LoopPolicy::ContinuousGoal.starts_telemetry());
        assert!(!LoopPolicy::StopAndThink.starts_telemetry());
    }
}
