pub mod log_event;
pub mod node;

use std::path::{Path, PathBuf};

use futures::future::{try_join, try_join_all};
use support::{fs::FileSystem, process::ProcessManager};
use tracing::{debug, info, warn};

use self::node::{NodeDescriptor, NodeHandle};
use crate::{
    errors::OrchestratorError,
    probes::{self, ProbeTimeouts},
    spawner::Supervisor,
    state::{kill_orphans, remove_artifacts, NetworkState, NodeState, TeardownReport},
};

/// A running local network: every node handle, the chain-spec they share and
/// the state file once persisted.
pub struct Network<PM, FS> {
    supervisor: Supervisor<PM, FS>,
    chain_spec: PathBuf,
    binary_path: PathBuf,
    timeouts: ProbeTimeouts,
    nodes: Vec<NodeHandle>,
    state_file: Option<PathBuf>,
}

impl<PM, FS> std::fmt::Debug for Network<PM, FS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("chain_spec", &self.chain_spec)
            .field("binary_path", &self.binary_path)
            .field("nodes", &self.nodes)
            .field("state_file", &self.state_file)
            .finish()
    }
}

impl<PM, FS> Network<PM, FS>
where
    PM: ProcessManager + Send + Sync,
    FS: FileSystem + Clone + Send + Sync + 'static,
{
    pub fn new(
        supervisor: Supervisor<PM, FS>,
        chain_spec: impl Into<PathBuf>,
        binary_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            supervisor,
            chain_spec: chain_spec.into(),
            binary_path: binary_path.into(),
            timeouts: ProbeTimeouts::default(),
            nodes: vec![],
            state_file: None,
        }
    }

    pub fn with_timeouts(self, timeouts: ProbeTimeouts) -> Self {
        Self { timeouts, ..self }
    }

    pub fn chain_spec(&self) -> &Path {
        &self.chain_spec
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    pub fn timeouts(&self) -> &ProbeTimeouts {
        &self.timeouts
    }

    pub fn nodes(&self) -> Vec<&NodeHandle> {
        self.nodes.iter().collect()
    }

    pub fn descriptors(&self) -> Vec<&NodeDescriptor> {
        self.nodes.iter().map(NodeHandle::descriptor).collect()
    }

    pub fn get_node(&self, name: impl AsRef<str>) -> Result<&NodeHandle, OrchestratorError> {
        self.position(name.as_ref()).map(|index| &self.nodes[index])
    }

    /// Starts the nodes one after the other, each one has to be up before the next.
    pub async fn start_topology(
        &mut self,
        descriptors: Vec<NodeDescriptor>,
    ) -> Result<(), OrchestratorError> {
        for descriptor in descriptors {
            self.add_node(descriptor).await?;
        }

        Ok(())
    }

    /// Starts one more node and waits until it's up.
    pub async fn add_node(&mut self, descriptor: NodeDescriptor) -> Result<(), OrchestratorError> {
        if self.position(descriptor.name()).is_ok() {
            return Err(OrchestratorError::DuplicatedNode(
                descriptor.name().to_string(),
            ));
        }
        self.ensure_base_path_free(&descriptor)?;

        let node = self.supervisor.start(descriptor, &self.chain_spec).await?;
        self.nodes.push(node);
        let node = &self.nodes[self.nodes.len() - 1];
        probes::started(node, self.timeouts.started).await?;
        info!("💤 {} is up", node.name());

        self.refresh_state().await
    }

    /// Waits until every named node reports `expected_peers` peers and
    /// `expected_finalized` finalized blocks, all the probes run concurrently.
    pub async fn await_convergence(
        &self,
        names: &[&str],
        expected_peers: u32,
        expected_finalized: u64,
    ) -> Result<(), OrchestratorError> {
        let nodes = names
            .iter()
            .map(|name| self.get_node(name))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "waiting for {names:?} to reach {expected_peers} peers and {expected_finalized} finalized blocks"
        );

        let peers = nodes
            .iter()
            .map(|node| probes::peer_count(node, expected_peers, self.timeouts.peers));
        let finality = nodes
            .iter()
            .map(|node| probes::finalized_blocks(node, expected_finalized, self.timeouts.finality));
        try_join(try_join_all(peers), try_join_all(finality)).await?;

        info!(
            "✅ {names:?} converged on {expected_peers} peers and {expected_finalized} finalized blocks"
        );
        Ok(())
    }

    /// [`Network::await_convergence`] over every node of the network.
    pub async fn await_convergence_all(
        &self,
        expected_peers: u32,
        expected_finalized: u64,
    ) -> Result<(), OrchestratorError> {
        let names: Vec<String> = self.nodes.iter().map(|n| n.name().to_string()).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        self.await_convergence(&names, expected_peers, expected_finalized)
            .await
    }

    /// Restarts `name` from `new_binary`, keeping its base path, ports and flags.
    pub async fn rolling_swap(
        &mut self,
        name: &str,
        new_binary: impl Into<PathBuf>,
    ) -> Result<(), OrchestratorError> {
        let index = self.position(name)?;
        let new_binary = new_binary.into();
        info!("🔄 swapping {name} to {}", new_binary.display());

        self.supervisor.stop(&self.nodes[index]).await?;
        let descriptor = self.nodes[index]
            .descriptor()
            .clone()
            .with_binary_path(new_binary);
        self.ensure_base_path_free(&descriptor)?;

        let node = self.supervisor.start(descriptor, &self.chain_spec).await?;
        self.nodes[index] = node;
        probes::started(&self.nodes[index], self.timeouts.started).await?;

        self.refresh_state().await
    }

    /// Writes the network state to `path`, it's kept up to date from now on.
    pub async fn persist_state(&mut self, path: impl Into<PathBuf>) -> Result<(), OrchestratorError> {
        self.state_file = Some(path.into());
        self.refresh_state().await
    }

    pub fn snapshot(&self) -> NetworkState {
        let mut state = NetworkState::new(&self.binary_path, &self.chain_spec);
        state.nodes = self
            .nodes
            .iter()
            .map(|node| NodeState {
                name: node.name().to_string(),
                rpc_port: node.descriptor().rpc_port(),
                port: node.descriptor().port(),
                pid: node.is_running().then(|| node.pid()).flatten(),
                base_path: node.descriptor().base_path().to_path_buf(),
            })
            .collect();

        state
    }

    /// Leaves the nodes running and gives up their handles, the state file is
    /// the only way left to tear them down.
    pub fn detach(self) -> Option<PathBuf> {
        for node in &self.nodes {
            info!("🔓 {} left running with pid {:?}", node.name(), node.pid());
        }
        if self.state_file.is_none() {
            warn!("⚠️ detaching a network without a state file");
        }

        self.state_file
    }

    /// Stops every node, reaps the ones only known from the state file and
    /// removes the chain-spec and the state file. Problems are logged and
    /// collected in the report, never returned.
    pub async fn teardown(self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for node in &self.nodes {
            let was_running = node.is_running();
            match self.supervisor.stop(node).await {
                Ok(()) if was_running => report.stopped.push(node.name().to_string()),
                Ok(()) => {},
                Err(err) => {
                    warn!("⚠️ {err}");
                    report.failures.push(err.to_string());
                },
            }
        }

        let mut artifacts = vec![self.chain_spec.as_path()];
        if let Some(state_file) = self.state_file.as_deref() {
            match NetworkState::read(self.supervisor.filesystem(), state_file).await {
                Ok(state) => {
                    let held: Vec<&str> = self.nodes.iter().map(NodeHandle::name).collect();
                    let reconciliation = state.reconcile(&held);
                    if !reconciliation.not_durable.is_empty() {
                        debug!("not persisted yet: {:?}", reconciliation.not_durable);
                    }
                    kill_orphans(&self.supervisor, &reconciliation.orphans, &mut report);
                },
                Err(err) => {
                    warn!("⚠️ can't read network state {}: {err}", state_file.display());
                    report.failures.push(err.to_string());
                },
            }
            artifacts.push(state_file);
        }
        remove_artifacts(self.supervisor.filesystem(), &artifacts, &mut report).await;

        info!("🧹 network torn down, {} nodes stopped", report.stopped.len());
        report
    }

    fn position(&self, name: &str) -> Result<usize, OrchestratorError> {
        self.nodes
            .iter()
            .position(|node| node.name() == name)
            .ok_or_else(|| {
                let list = self
                    .nodes
                    .iter()
                    .map(|n| n.name())
                    .collect::<Vec<_>>()
                    .join(", ");
                OrchestratorError::NodeNotFound(name.to_string(), list)
            })
    }

    fn ensure_base_path_free(&self, descriptor: &NodeDescriptor) -> Result<(), OrchestratorError> {
        match self
            .nodes
            .iter()
            .find(|node| node.is_running() && node.descriptor().base_path() == descriptor.base_path())
        {
            Some(node) => Err(OrchestratorError::BasePathInUse(
                descriptor.base_path().to_path_buf(),
                node.name().to_string(),
            )),
            None => Ok(()),
        }
    }

    async fn refresh_state(&self) -> Result<(), OrchestratorError> {
        let Some(path) = self.state_file.as_deref() else {
            return Ok(());
        };
        self.snapshot()
            .write(self.supervisor.filesystem(), path)
            .await?;
        debug!("network state written to {}", path.display());

        Ok(())
    }
}
