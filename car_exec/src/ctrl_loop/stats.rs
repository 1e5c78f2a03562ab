//! Statistics gathered over a control loop run

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::BTreeMap;

use comms_if::cmd::{Ack, Command};
use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Summary of a control loop run, saved into the session at exit.
#[derive(Debug, Default, Clone, Serialize)]
pub struct LoopStats {
    /// Number of perception cycles started
    pub num_cycles: u64,

    /// Number of sends of each command letter
    pub commands_sent: BTreeMap<String, u64>,

    pub num_acked: u64,
    pub num_rejected: u64,
    pub num_no_response: u64,

    pub capture_faults: u64,
    pub inference_faults: u64,

    /// Command sends which failed with an I/O fault
    pub link_faults: u64,

    /// Stops sent in response to a perception fault
    pub safety_stops: u64,

    /// Telemetry records received
    pub tm_records: u64,

    /// Most recent decision taken from perception
    pub last_goal: Option<Command>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LoopStats {
    /// Count a send of `cmd` and its outcome.
    pub fn record_send(&mut self, cmd: Command, ack: Option<Ack>) {
        *self.commands_sent.entry(cmd.to_string()).or_insert(0) += 1;

        match ack {
            Some(Ack::Acked) => self.num_acked += 1,
            Some(Ack::Rejected) => self.num_rejected += 1,
            Some(Ack::NoResponse(_)) => self.num_no_response += 1,
            None => self.link_faults += 1,
        }
    }

    /// Number of times `cmd` was sent.
    pub fn num_sent(&self, cmd: Command) -> u64 {
        self.commands_sent
            .get(&cmd.to_string())
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_send() {
        let mut stats = LoopStats::default();

        stats.record_send(Command::Stop, Some(Ack::Acked));
        stats.record_send(Command::Stop, Some(Ack::NoResponse(None)));
        stats.record_send(Command::Left, Some(Ack::Rejected));
        stats.record_send(Command::Left, None);

        assert_eq!(stats.num_sent(Command::Stop), 2);
        assert_eq!(stats.num_sent(Command::Left), 2);
        assert_eq!(stats.num_sent(Command::Forward), 0);
        assert_eq!(
            (stats.num_acked, stats.num_rejected, stats.num_no_response, stats.link_faults),
            (1, 1, 1, 1)
        );

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"S\":2"));
    }
}
