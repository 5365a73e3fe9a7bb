//! Harness orchestrator error definitions.

use std::{io, path::PathBuf};

use configuration::ConfigError;
use support::fs::FileSystemError;

use crate::{generators::errors::ChainSpecError, state::StateError, waiter::WaitError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid network configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Spawning node {0} failed: {1}")]
    Spawn(String, #[source] io::Error),
    #[error("Stopping node {0} failed: {1}")]
    Stop(String, #[source] io::Error),
    #[error(transparent)]
    Timeout(#[from] WaitError),
    #[error("Chain-spec error: {0}")]
    ChainSpec(#[from] ChainSpecError),
    #[error("Network state error: {0}")]
    State(#[from] StateError),
    #[error("FileSystem error: {0}")]
    FileSystem(#[from] FileSystemError),
    #[error("can't find node with name: {0:?}, should be one of {1}")]
    NodeNotFound(String, String),
    #[error("Base path {0:?} is still used by the running node {1}")]
    BasePathInUse(PathBuf, String),
    #[error("Node {0} is already part of the network")]
    DuplicatedNode(String),
    #[error("Interrupted, the network was torn down")]
    Interrupted,
}
