use std::{io, process::ExitStatus};

use support::fs::FileSystemError;

#[derive(Debug, thiserror::Error)]
pub enum ChainSpecError {
    #[error("Error running cmd: {0}, err: {1}")]
    Spawn(String, #[source] io::Error),
    #[error("Chain-spec build failed ({status}): {stderr}")]
    Generation { status: ExitStatus, stderr: String },
    #[error("Chain-spec build produced no output")]
    EmptyOutput,
    #[error("Invalid chain-spec json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Patching chain-spec failed: {0}")]
    Patch(String),
    #[error("FileSystem error: {0}")]
    FileSystem(#[from] FileSystemError),
}
