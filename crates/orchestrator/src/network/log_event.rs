use lazy_static::lazy_static;
use regex::Regex;
use support::constants::{THIS_IS_A_BUG, VALID_REGEX};

lazy_static! {
    static ref PEERS_RE: Regex = Regex::new(r"Idle \((?<peers>\d+) peers\)")
        .unwrap_or_else(|_| panic!("{VALID_REGEX} {THIS_IS_A_BUG}"));
    static ref FINALIZED_RE: Regex = Regex::new(r"finalized #(?<blocks>\d+)")
        .unwrap_or_else(|_| panic!("{VALID_REGEX} {THIS_IS_A_BUG}"));
}

const IDLE_MARKER: &str = "💤 Idle";

/// Readiness facts carried by a node informant line, e.g.
/// `💤 Idle (2 peers), best: #12 (0x1a2b…), finalized #10 (0x3c4d…)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    Idle,
    PeerCount(u32),
    FinalizedHeight(u64),
}

impl LogEvent {
    /// Every event found in `line`, in a stable order: idle, peers, finalized.
    pub fn decode(line: &str) -> Vec<LogEvent> {
        let mut events = vec![];

        if line.contains(IDLE_MARKER) {
            events.push(LogEvent::Idle);
        }

        if let Some(peers) = PEERS_RE
            .captures(line)
            .and_then(|caps| caps["peers"].parse::<u32>().ok())
        {
            events.push(LogEvent::PeerCount(peers));
        }

        if let Some(blocks) = FINALIZED_RE
            .captures(line)
            .and_then(|caps| caps["blocks"].parse::<u64>().ok())
        {
            events.push(LogEvent::FinalizedHeight(blocks));
        }

        events
    }
}

/// Whether the line reports the node as idle.
pub fn is_idle(line: &str) -> bool {
    LogEvent::decode(line).contains(&LogEvent::Idle)
}

/// Whether the line reports at least `expected` peers.
pub fn has_peers(line: &str, expected: u32) -> bool {
    LogEvent::decode(line)
        .iter()
        .any(|event| matches!(event, LogEvent::PeerCount(peers) if *peers >= expected))
}

/// Whether the line reports at least `expected` finalized blocks.
pub fn has_finalized(line: &str, expected: u64) -> bool {
    LogEvent::decode(line)
        .iter()
        .any(|event| matches!(event, LogEvent::FinalizedHeight(blocks) if *blocks >= expected))
}
