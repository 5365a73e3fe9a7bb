//! Wait for a line on a node's diagnostic stream.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace, warn};

use crate::network::node::NodeHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// Carries the caller supplied message verbatim.
    #[error("{0}")]
    Timeout(String),
}

impl WaitError {
    pub fn message(&self) -> &str {
        match self {
            Self::Timeout(message) => message,
        }
    }
}

/// Resolves the first time `matcher` accepts a line that `node` writes to stderr
/// after this call, or fails with `error_message` once `timeout` elapses.
///
/// Lines are fed to `matcher` one at a time, without their line terminator. The
/// subscription is dropped on both outcomes, so lines arriving later are never
/// seen by `matcher` and a late match can't change the result. If the stream
/// closes before a match the wait keeps pending until the deadline.
pub async fn wait_for<F>(
    node: &NodeHandle,
    timeout: Duration,
    error_message: impl Into<String>,
    mut matcher: F,
) -> Result<(), WaitError>
where
    F: FnMut(&str) -> bool,
{
    let error_message = error_message.into();
    let mut logs = node.subscribe();

    let outcome = tokio::time::timeout(timeout, async {
        loop {
            match logs.recv().await {
                Ok(line) => {
                    if matcher(&line) {
                        trace!("{}: matched line {line}", node.name());
                        return;
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("⚠️ {}: waiter fell behind, {skipped} lines skipped", node.name());
                },
                Err(RecvError::Closed) => {
                    debug!("{}: log stream closed, waiting for the deadline", node.name());
                    futures::future::pending::<()>().await;
                },
            }
        }
    })
    .await;
    drop(logs);

    outcome.map_err(|_| WaitError::Timeout(error_message))
}
