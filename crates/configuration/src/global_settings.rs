use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use support::constants::{BINARY_PATH_ENV, DEFAULT_BINARY_PATH};

use crate::shared::{constants::*, errors::FieldError};

/// Settings applied to the whole network.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlobalSettings {
    /// Node binary used by every node without its own `binary_path`.
    #[serde(default = "default_binary_path")]
    binary_path: PathBuf,

    /// Directory holding the chain-spec, the state file and the nodes base paths.
    #[serde(default = "default_base_dir")]
    base_dir: PathBuf,

    /// Chain passed to `build-spec --chain`.
    #[serde(default = "default_chain")]
    chain: String,

    /// Chain-spec location, `<base_dir>/chain-spec.json` if not set.
    chain_spec_path: Option<PathBuf>,

    /// State file location, `<base_dir>/network-state.json` if not set.
    state_file: Option<PathBuf>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            base_dir: default_base_dir(),
            chain: default_chain(),
            chain_spec_path: None,
            state_file: None,
        }
    }
}

impl GlobalSettings {
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn chain_spec_path(&self) -> PathBuf {
        self.chain_spec_path
            .clone()
            .unwrap_or_else(|| self.base_dir.join(DEFAULT_CHAIN_SPEC_FILE))
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.base_dir.join(DEFAULT_STATE_FILE))
    }

    pub(crate) fn validate(&self) -> Result<(), FieldError> {
        if self.chain.trim().is_empty() {
            return Err(FieldError::EmptyChain);
        }

        Ok(())
    }
}

/// Resolves the default binary: `BINARY_PATH` when set and not empty.
pub(crate) fn binary_path_from(env_value: Option<String>) -> PathBuf {
    env_value
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY_PATH))
}

fn default_binary_path() -> PathBuf {
    binary_path_from(std::env::var(BINARY_PATH_ENV).ok())
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DIR)
}

fn default_chain() -> String {
    DEFAULT_CHAIN.to_string()
}

/// Deadlines of the readiness probes, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    start_secs: u64,
    peers_secs: u64,
    finality_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            start_secs: DEFAULT_START_TIMEOUT_SECS,
            peers_secs: DEFAULT_PEERS_TIMEOUT_SECS,
            finality_secs: DEFAULT_FINALITY_TIMEOUT_SECS,
        }
    }
}

impl Timeouts {
    pub fn new(start_secs: u64, peers_secs: u64, finality_secs: u64) -> Self {
        Self {
            start_secs,
            peers_secs,
            finality_secs,
        }
    }

    pub fn start(&self) -> Duration {
        Duration::from_secs(self.start_secs)
    }

    pub fn peers(&self) -> Duration {
        Duration::from_secs(self.peers_secs)
    }

    pub fn finality(&self) -> Duration {
        Duration::from_secs(self.finality_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), FieldError> {
        if self.start_secs == 0 {
            return Err(FieldError::ZeroTimeout("start_secs"));
        }
        if self.peers_secs == 0 {
            return Err(FieldError::ZeroTimeout("peers_secs"));
        }
        if self.finality_secs == 0 {
            return Err(FieldError::ZeroTimeout("finality_secs"));
        }

        Ok(())
    }
}

/// Milestones every node must reach before the network is considered up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Convergence {
    /// Expected peers per node, defaults to every other node.
    peers: Option<u32>,
    /// Expected finalized height.
    finalized: u64,
}

impl Default for Convergence {
    fn default() -> Self {
        Self {
            peers: None,
            finalized: DEFAULT_EXPECTED_FINALIZED,
        }
    }
}

impl Convergence {
    pub fn new(peers: Option<u32>, finalized: u64) -> Self {
        Self { peers, finalized }
    }

    pub fn peers(&self) -> Option<u32> {
        self.peers
    }

    pub fn finalized(&self) -> u64 {
        self.finalized
    }
}

#[derive(Debug, Default)]
pub struct GlobalSettingsBuilder {
    config: GlobalSettings,
}

impl GlobalSettingsBuilder {
    pub fn new() -> GlobalSettingsBuilder {
        Self::default()
    }

    /// Starts from existing settings, to override some of them.
    pub fn from_settings(settings: GlobalSettings) -> GlobalSettingsBuilder {
        Self::transition(settings)
    }

    fn transition(config: GlobalSettings) -> Self {
        Self { config }
    }

    pub fn with_binary_path(self, binary_path: impl Into<PathBuf>) -> Self {
        Self::transition(GlobalSettings {
            binary_path: binary_path.into(),
            ..self.config
        })
    }

    pub fn with_base_dir(self, base_dir: impl Into<PathBuf>) -> Self {
        Self::transition(GlobalSettings {
            base_dir: base_dir.into(),
            ..self.config
        })
    }

    pub fn with_chain(self, chain: impl Into<String>) -> Self {
        Self::transition(GlobalSettings {
            chain: chain.into(),
            ..self.config
        })
    }

    pub fn with_chain_spec_path(self, chain_spec_path: impl Into<PathBuf>) -> Self {
        Self::transition(GlobalSettings {
            chain_spec_path: Some(chain_spec_path.into()),
            ..self.config
        })
    }

    pub fn with_state_file(self, state_file: impl Into<PathBuf>) -> Self {
        Self::transition(GlobalSettings {
            state_file: Some(state_file.into()),
            ..self.config
        })
    }

    pub fn build(self) -> Result<GlobalSettings, FieldError> {
        self.config.validate()?;

        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_settings_builder_should_build_a_new_global_settings_correctly() {
        let settings = GlobalSettingsBuilder::new()
            .with_binary_path("/opt/subtensor/node-subtensor")
            .with_base_dir("/tmp/upgrade-check")
            .with_chain("local")
            .with_state_file("/tmp/state.json")
            .build()
            .unwrap();

        assert_eq!(
            settings.binary_path(),
            Path::new("/opt/subtensor/node-subtensor")
        );
        assert_eq!(settings.base_dir(), Path::new("/tmp/upgrade-check"));
        assert_eq!(settings.chain(), "local");
        assert_eq!(
            settings.chain_spec_path(),
            PathBuf::from("/tmp/upgrade-check/chain-spec.json")
        );
        assert_eq!(settings.state_file(), PathBuf::from("/tmp/state.json"));
    }

    #[test]
    fn global_settings_builder_should_reject_an_empty_chain() {
        let err = GlobalSettingsBuilder::new().with_chain(" ").build().unwrap_err();

        assert_eq!(err, FieldError::EmptyChain);
    }

    #[test]
    fn binary_path_should_come_from_the_env_value_when_present() {
        assert_eq!(
            binary_path_from(Some("/custom/node-subtensor".into())),
            PathBuf::from("/custom/node-subtensor")
        );
        assert_eq!(
            binary_path_from(Some("".into())),
            PathBuf::from(DEFAULT_BINARY_PATH)
        );
        assert_eq!(binary_path_from(None), PathBuf::from(DEFAULT_BINARY_PATH));
    }

    #[test]
    fn timeouts_should_default_to_the_probe_deadlines() {
        let timeouts = Timeouts::default();

        assert_eq!(timeouts.start(), Duration::from_secs(30));
        assert_eq!(timeouts.peers(), Duration::from_secs(30));
        assert_eq!(timeouts.finality(), Duration::from_secs(600));
    }
}
