use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use support::constants::{THIS_IS_A_BUG, VALID_REGEX};

use crate::shared::errors::FieldError;

lazy_static! {
    static ref NODE_NAME: Regex =
        Regex::new(r"^[a-z0-9][a-z0-9-]*$").unwrap_or_else(|_| panic!("{VALID_REGEX} {THIS_IS_A_BUG}"));
}

/// A node of the network, the name is also passed as `--<name>` to the binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeConfig {
    name: String,
    port: u16,
    rpc_port: u16,
    #[serde(default)]
    validator: bool,
    /// Overrides the network binary for this node.
    binary_path: Option<PathBuf>,
    /// Overrides `<base_dir>/<name>`.
    base_path: Option<PathBuf>,
    /// Extra flags appended after the fixed ones.
    #[serde(default)]
    args: Vec<String>,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, port: u16, rpc_port: u16, validator: bool) -> Self {
        Self {
            name: name.into(),
            port,
            rpc_port,
            validator,
            binary_path: None,
            base_path: None,
            args: vec![],
        }
    }

    pub fn with_binary_path(self, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: Some(binary_path.into()),
            ..self
        }
    }

    pub fn with_base_path(self, base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: Some(base_path.into()),
            ..self
        }
    }

    pub fn with_args(self, args: Vec<String>) -> Self {
        Self { args, ..self }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port
    }

    pub fn is_validator(&self) -> bool {
        self.validator
    }

    pub fn binary_path(&self) -> Option<&Path> {
        self.binary_path.as_deref()
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub(crate) fn validate_name(&self) -> Result<(), FieldError> {
        if NODE_NAME.is_match(&self.name) {
            Ok(())
        } else {
            Err(FieldError::InvalidName(self.name.clone()))
        }
    }
}
