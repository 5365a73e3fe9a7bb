use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    global_settings::{Convergence, GlobalSettings, Timeouts},
    node::NodeConfig,
    shared::errors::{ConfigError, FieldError},
};

/// A network configuration: global settings, probe deadlines and the ordered list of nodes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    settings: GlobalSettings,

    #[serde(default)]
    timeouts: Timeouts,

    #[serde(default)]
    convergence: Convergence,

    #[serde(default)]
    nodes: Vec<NodeConfig>,
}

impl NetworkConfig {
    pub fn new(settings: GlobalSettings, nodes: Vec<NodeConfig>) -> Result<Self, ConfigError> {
        let config = Self {
            settings,
            timeouts: Timeouts::default(),
            convergence: Convergence::default(),
            nodes,
        };
        config.validate()?;

        Ok(config)
    }

    /// Replaces the global settings, the result is validated again.
    pub fn with_settings(self, settings: GlobalSettings) -> Result<Self, ConfigError> {
        let config = Self { settings, ..self };
        config.validate()?;

        Ok(config)
    }

    pub fn with_timeouts(self, timeouts: Timeouts) -> Self {
        Self { timeouts, ..self }
    }

    pub fn with_convergence(self, convergence: Convergence) -> Self {
        Self {
            convergence,
            ..self
        }
    }

    /// Load and validate a configuration from a toml file.
    pub fn load_from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Read(path.to_path_buf(), err))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: NetworkConfig = toml::from_str(content)?;
        config.validate()?;

        Ok(config)
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn nodes(&self) -> &[NodeConfig] {
        &self.nodes
    }

    /// Peers every node should report, every other node unless configured.
    pub fn expected_peers(&self) -> u32 {
        self.convergence
            .peers()
            .unwrap_or_else(|| self.nodes.len().saturating_sub(1) as u32)
    }

    pub fn expected_finalized(&self) -> u64 {
        self.convergence.finalized()
    }

    pub fn node_binary_path(&self, node: &NodeConfig) -> PathBuf {
        node.binary_path()
            .unwrap_or_else(|| self.settings.binary_path())
            .to_path_buf()
    }

    pub fn node_base_path(&self, node: &NodeConfig) -> PathBuf {
        node.base_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.base_dir().join(node.name()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.settings
            .validate()
            .map_err(ConfigError::GlobalSettings)?;
        self.timeouts
            .validate()
            .map_err(ConfigError::GlobalSettings)?;

        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for node in &self.nodes {
            let node_err = |err| ConfigError::Node(node.name().to_string(), err);

            node.validate_name().map_err(node_err)?;
            if !names.insert(node.name()) {
                return Err(node_err(FieldError::DuplicatedName(node.name().to_string())));
            }
            if !ports.insert(node.port()) {
                return Err(node_err(FieldError::PortAlreadyUsed("port", node.port())));
            }
            if !ports.insert(node.rpc_port()) {
                return Err(node_err(FieldError::PortAlreadyUsed(
                    "rpc_port",
                    node.rpc_port(),
                )));
            }
        }

        Ok(())
    }
}
