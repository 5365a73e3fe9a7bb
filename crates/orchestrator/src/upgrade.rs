//! Rolling upgrade compatibility check between two node binaries.
//!
//! Two validators and a full node are started from the old binary, then swapped
//! one at a time to the new binary. After every swap the whole network has to
//! keep its peers and finalize further than before.

use std::{
    future::Future,
    path::{Path, PathBuf},
};

use configuration::shared::constants::{
    DEFAULT_BASE_DIR, DEFAULT_CHAIN, DEFAULT_CHAIN_SPEC_FILE, DEFAULT_EXPECTED_FINALIZED,
    DEFAULT_STATE_FILE,
};
use support::{fs::FileSystem, process::ProcessManager};
use tracing::{error, info, warn};

use crate::{
    errors::OrchestratorError,
    generators::ChainSpecGenerator,
    network::{node::NodeDescriptor, Network},
    probes::ProbeTimeouts,
    spawner::Supervisor,
    state::TeardownReport,
};

pub const DEFAULT_FINALITY_STEP: u64 = 5;

const VALIDATORS: [&str; 2] = ["one", "two"];
const FULL_NODE: &str = "alice";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapStage {
    pub node: String,
    pub finalized: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub stages: Vec<SwapStage>,
    pub teardown: TeardownReport,
}

#[derive(Debug, Clone)]
pub struct UpgradeCheck {
    old_binary: PathBuf,
    new_binary: PathBuf,
    base_dir: PathBuf,
    chain: String,
    initial_finalized: u64,
    finality_step: u64,
    timeouts: ProbeTimeouts,
}

impl UpgradeCheck {
    pub fn new(old_binary: impl Into<PathBuf>, new_binary: impl Into<PathBuf>) -> Self {
        Self {
            old_binary: old_binary.into(),
            new_binary: new_binary.into(),
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            chain: DEFAULT_CHAIN.to_string(),
            initial_finalized: DEFAULT_EXPECTED_FINALIZED,
            finality_step: DEFAULT_FINALITY_STEP,
            timeouts: ProbeTimeouts::default(),
        }
    }

    pub fn with_base_dir(self, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..self
        }
    }

    pub fn with_chain(self, chain: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            ..self
        }
    }

    pub fn with_initial_finalized(self, initial_finalized: u64) -> Self {
        Self {
            initial_finalized,
            ..self
        }
    }

    /// Finalized blocks required on top of the previous stage, at least one.
    pub fn with_finality_step(self, finality_step: u64) -> Self {
        Self {
            finality_step: finality_step.max(1),
            ..self
        }
    }

    pub fn with_timeouts(self, timeouts: ProbeTimeouts) -> Self {
        Self { timeouts, ..self }
    }

    pub fn chain_spec_path(&self) -> PathBuf {
        self.base_dir.join(DEFAULT_CHAIN_SPEC_FILE)
    }

    pub fn state_file(&self) -> PathBuf {
        self.base_dir.join(DEFAULT_STATE_FILE)
    }

    /// `one` and `two` validate, `alice` only follows.
    pub fn topology(&self) -> Vec<NodeDescriptor> {
        VALIDATORS
            .iter()
            .map(|name| (*name, true))
            .chain([(FULL_NODE, false)])
            .zip(0..)
            .map(|((name, validator), offset)| {
                NodeDescriptor::new(
                    name,
                    &self.old_binary,
                    self.base_dir.join(name),
                    30334 + offset,
                    9944 + offset,
                )
                .with_validator(validator)
            })
            .collect()
    }

    /// Runs the whole check. The network is torn down whatever the outcome.
    pub async fn run<PM, FS>(
        &self,
        process_manager: PM,
        filesystem: FS,
    ) -> Result<UpgradeReport, OrchestratorError>
    where
        PM: ProcessManager + Send + Sync,
        FS: FileSystem + Clone + Send + Sync + 'static,
    {
        self.run_until(process_manager, filesystem, std::future::pending::<()>())
            .await
    }

    /// Same as [`UpgradeCheck::run`], but gives up with
    /// [`OrchestratorError::Interrupted`] once `shutdown` resolves. The network
    /// is torn down in that case too.
    pub async fn run_until<PM, FS, S>(
        &self,
        process_manager: PM,
        filesystem: FS,
        shutdown: S,
    ) -> Result<UpgradeReport, OrchestratorError>
    where
        PM: ProcessManager + Send + Sync,
        FS: FileSystem + Clone + Send + Sync + 'static,
        S: Future<Output = ()>,
    {
        let chain_spec = self.chain_spec_path();
        ChainSpecGenerator::new(&process_manager, &filesystem)
            .generate(&self.old_binary, &chain_spec, &self.chain, None)
            .await?;

        let supervisor = Supervisor::new(process_manager, filesystem);
        let mut network =
            Network::new(supervisor, &chain_spec, &self.old_binary).with_timeouts(self.timeouts);

        let outcome = tokio::select! {
            outcome = self.drive(&mut network) => outcome,
            _ = shutdown => {
                warn!("⚠️ rolling upgrade interrupted, tearing the network down");
                Err(OrchestratorError::Interrupted)
            },
        };
        let teardown = network.teardown().await;

        match outcome {
            Ok(stages) => {
                info!("🎉 rolling upgrade to {} passed", self.new_binary.display());
                Ok(UpgradeReport { stages, teardown })
            },
            Err(err) => {
                error!("❌ rolling upgrade failed: {err}");
                Err(err)
            },
        }
    }

    async fn drive<PM, FS>(
        &self,
        network: &mut Network<PM, FS>,
    ) -> Result<Vec<SwapStage>, OrchestratorError>
    where
        PM: ProcessManager + Send + Sync,
        FS: FileSystem + Clone + Send + Sync + 'static,
    {
        let mut topology = self.topology();
        let full_node = topology.split_off(VALIDATORS.len());

        network.start_topology(topology).await?;
        network
            .await_convergence(&VALIDATORS, 1, self.initial_finalized)
            .await?;

        for descriptor in full_node {
            network.add_node(descriptor).await?;
        }
        network
            .await_convergence_all(2, self.initial_finalized)
            .await?;
        network.persist_state(self.state_file()).await?;

        let mut stages = vec![];
        let mut finalized = self.initial_finalized;
        for name in VALIDATORS.into_iter().chain([FULL_NODE]) {
            network.rolling_swap(name, &self.new_binary).await?;
            finalized += self.finality_step;
            network.await_convergence_all(2, finalized).await?;
            info!("✅ {name} swapped, network finalized {finalized} blocks");
            stages.push(SwapStage {
                node: name.to_string(),
                finalized,
            });
        }

        Ok(stages)
    }

    pub fn old_binary(&self) -> &Path {
        &self.old_binary
    }

    pub fn new_binary(&self) -> &Path {
        &self.new_binary
    }
}
