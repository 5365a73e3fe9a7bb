//! Readiness probes, each one a [`wait_for`] over the node informant lines.

use std::time::Duration;

use configuration::{
    shared::constants::{
        DEFAULT_FINALITY_TIMEOUT_SECS, DEFAULT_PEERS_TIMEOUT_SECS, DEFAULT_START_TIMEOUT_SECS,
    },
    Timeouts,
};

use crate::{
    network::{log_event, node::NodeHandle},
    waiter::{wait_for, WaitError},
};

pub const STARTED_TIMEOUT: Duration = Duration::from_secs(DEFAULT_START_TIMEOUT_SECS);
pub const PEERS_TIMEOUT: Duration = Duration::from_secs(DEFAULT_PEERS_TIMEOUT_SECS);
pub const FINALITY_TIMEOUT: Duration = Duration::from_secs(DEFAULT_FINALITY_TIMEOUT_SECS);

/// Deadlines used by the network for each probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    pub started: Duration,
    pub peers: Duration,
    pub finality: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            started: STARTED_TIMEOUT,
            peers: PEERS_TIMEOUT,
            finality: FINALITY_TIMEOUT,
        }
    }
}

impl From<&Timeouts> for ProbeTimeouts {
    fn from(timeouts: &Timeouts) -> Self {
        Self {
            started: timeouts.start(),
            peers: timeouts.peers(),
            finality: timeouts.finality(),
        }
    }
}

/// The node printed its first idle line.
pub async fn started(node: &NodeHandle, timeout: Duration) -> Result<(), WaitError> {
    wait_for(
        node,
        timeout,
        format!("{}: Failed to start in time", node.name()),
        log_event::is_idle,
    )
    .await
}

/// The node reports at least `expected` peers.
pub async fn peer_count(
    node: &NodeHandle,
    expected: u32,
    timeout: Duration,
) -> Result<(), WaitError> {
    wait_for(
        node,
        timeout,
        format!("{}: Failed to reach {expected} peers in time", node.name()),
        |line| log_event::has_peers(line, expected),
    )
    .await
}

/// The node reports at least `expected` finalized blocks.
pub async fn finalized_blocks(
    node: &NodeHandle,
    expected: u64,
    timeout: Duration,
) -> Result<(), WaitError> {
    wait_for(
        node,
        timeout,
        format!(
            "{}: Failed to reach {expected} finalized blocks in time",
            node.name()
        ),
        |line| log_event::has_finalized(line, expected),
    )
    .await
}
