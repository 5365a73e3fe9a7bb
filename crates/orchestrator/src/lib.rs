//! Local network orchestration for the subtensor node: chain-spec generation,
//! node processes, readiness probes over their logs and rolling upgrades.

pub mod e2e;
pub mod errors;
pub mod generators;
pub mod network;
pub mod probes;
pub mod spawner;
pub mod state;
pub mod upgrade;
pub mod waiter;

#[cfg(test)]
mod test_helpers;

use configuration::NetworkConfig;
pub use errors::OrchestratorError;
use generators::{ChainSpecGenerator, ChainSpecPatch};
pub use network::{
    node::{NodeDescriptor, NodeHandle, NodeLifecycle},
    Network,
};
use probes::ProbeTimeouts;
pub use spawner::Supervisor;
use support::{fs::FileSystem, process::ProcessManager};
use tracing::{info, warn};

pub struct Orchestrator<PM, FS>
where
    PM: ProcessManager + Clone + Send + Sync,
    FS: FileSystem + Clone + Send + Sync + 'static,
{
    process_manager: PM,
    filesystem: FS,
    kill_on_drop: bool,
}

impl<PM, FS> Orchestrator<PM, FS>
where
    PM: ProcessManager + Clone + Send + Sync,
    FS: FileSystem + Clone + Send + Sync + 'static,
{
    pub fn new(process_manager: PM, filesystem: FS) -> Self {
        Self {
            process_manager,
            filesystem,
            kill_on_drop: true,
        }
    }

    /// Keep the nodes alive when their handles are dropped, see [`Network::detach`].
    pub fn detached(self) -> Self {
        Self {
            kill_on_drop: false,
            ..self
        }
    }

    /// Generates the chain-spec, starts every configured node, waits for the
    /// network to converge and persists its state. A network that fails to come
    /// up is torn down before returning the error.
    pub async fn spawn(
        &self,
        config: &NetworkConfig,
        patch: Option<&dyn ChainSpecPatch>,
    ) -> Result<Network<PM, FS>, OrchestratorError> {
        let settings = config.settings();
        let chain_spec = settings.chain_spec_path();
        self.filesystem.create_dir_all(settings.base_dir()).await?;

        ChainSpecGenerator::new(&self.process_manager, &self.filesystem)
            .generate(settings.binary_path(), &chain_spec, settings.chain(), patch)
            .await?;

        let supervisor = Supervisor::new(self.process_manager.clone(), self.filesystem.clone())
            .with_kill_on_drop(self.kill_on_drop);
        let mut network = Network::new(supervisor, chain_spec, settings.binary_path())
            .with_timeouts(ProbeTimeouts::from(config.timeouts()));

        let descriptors = config
            .nodes()
            .iter()
            .map(|node| NodeDescriptor::from_config(config, node))
            .collect();

        let spawned = async {
            network.start_topology(descriptors).await?;
            network
                .await_convergence_all(config.expected_peers(), config.expected_finalized())
                .await?;
            network.persist_state(settings.state_file()).await
        }
        .await;

        if let Err(err) = spawned {
            warn!("⚠️ network failed to come up, tearing it down: {err}");
            network.teardown().await;
            return Err(err);
        }

        info!("🚀🚀🚀🚀 network is up and running");
        Ok(network)
    }
}
