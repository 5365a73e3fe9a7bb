use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use configuration::{NetworkConfig, NodeConfig};
use support::process::DynProcess;
use tokio::{sync::broadcast, task::JoinHandle};

/// Static description of a node to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    name: String,
    binary_path: PathBuf,
    base_path: PathBuf,
    port: u16,
    rpc_port: u16,
    validator: bool,
    args: Vec<String>,
}

impl NodeDescriptor {
    pub fn new(
        name: impl Into<String>,
        binary_path: impl Into<PathBuf>,
        base_path: impl Into<PathBuf>,
        port: u16,
        rpc_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            binary_path: binary_path.into(),
            base_path: base_path.into(),
            port,
            rpc_port,
            validator: false,
            args: vec![],
        }
    }

    /// Descriptor of `node`, with the network defaults filled in.
    pub fn from_config(network: &NetworkConfig, node: &NodeConfig) -> Self {
        Self::new(
            node.name(),
            network.node_binary_path(node),
            network.node_base_path(node),
            node.port(),
            node.rpc_port(),
        )
        .with_validator(node.is_validator())
        .with_args(node.args().to_vec())
    }

    pub fn with_validator(self, validator: bool) -> Self {
        Self { validator, ..self }
    }

    pub fn with_args(self, args: Vec<String>) -> Self {
        Self { args, ..self }
    }

    pub fn with_binary_path(self, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
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

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// File collecting both output streams of the node.
    pub fn log_path(&self) -> PathBuf {
        self.base_path.join(format!("{}.log", self.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug)]
struct Status {
    lifecycle: NodeLifecycle,
    exited_unexpectedly: bool,
}

/// Lifecycle shared by a handle and the tasks reading the node output.
#[derive(Debug, Clone)]
pub(crate) struct NodeStatus(Arc<Mutex<Status>>);

impl NodeStatus {
    pub(crate) fn running() -> Self {
        Self(Arc::new(Mutex::new(Status {
            lifecycle: NodeLifecycle::Running,
            exited_unexpectedly: false,
        })))
    }

    fn lifecycle(&self) -> NodeLifecycle {
        lock(&self.0).lifecycle
    }

    fn set_lifecycle(&self, lifecycle: NodeLifecycle) {
        lock(&self.0).lifecycle = lifecycle;
    }

    fn begin_stop(&self) -> bool {
        let mut status = lock(&self.0);
        if status.lifecycle != NodeLifecycle::Running {
            return false;
        }
        status.lifecycle = NodeLifecycle::Stopping;
        true
    }

    /// Records that the output ended on its own, false if the node was being
    /// stopped by us.
    pub(crate) fn mark_exited(&self) -> bool {
        let mut status = lock(&self.0);
        if status.lifecycle != NodeLifecycle::Running {
            return false;
        }
        status.exited_unexpectedly = true;
        true
    }

    fn exited_unexpectedly(&self) -> bool {
        lock(&self.0).exited_unexpectedly
    }
}

/// A started node. Owns the OS process exclusively, the network hands out
/// references only.
#[derive(Debug)]
pub struct NodeHandle {
    descriptor: NodeDescriptor,
    process: DynProcess,
    pid: Option<u32>,
    status: NodeStatus,
    logs: broadcast::Sender<Arc<str>>,
    log_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeHandle {
    pub(crate) fn new(
        descriptor: NodeDescriptor,
        process: DynProcess,
        pid: Option<u32>,
        status: NodeStatus,
        logs: broadcast::Sender<Arc<str>>,
        log_tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            descriptor,
            process,
            pid,
            status,
            logs,
            log_tasks: Mutex::new(log_tasks),
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    /// OS pid captured at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn lifecycle(&self) -> NodeLifecycle {
        self.status.lifecycle()
    }

    /// Whether the process ended without being stopped.
    pub fn exited_unexpectedly(&self) -> bool {
        self.status.exited_unexpectedly()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == NodeLifecycle::Running
    }

    /// New receiver of the stderr lines, starting from the next line written.
    /// Nodes writing straight to their log file broadcast both streams.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.logs.subscribe()
    }

    /// Number of live subscriptions to the stderr lines.
    pub fn subscribers(&self) -> usize {
        self.logs.receiver_count()
    }

    pub(crate) fn process(&self) -> &DynProcess {
        &self.process
    }

    /// Moves a running node to `Stopping`, false if it wasn't running.
    pub(crate) fn begin_stop(&self) -> bool {
        self.status.begin_stop()
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: NodeLifecycle) {
        self.status.set_lifecycle(lifecycle);
    }

    pub(crate) fn take_log_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *lock(&self.log_tasks))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use configuration::GlobalSettingsBuilder;

    use super::*;

    #[test]
    fn descriptor_from_config_should_fill_the_network_defaults() {
        let settings = GlobalSettingsBuilder::new()
            .with_binary_path("/bin/node-subtensor")
            .with_base_dir("/tmp/localnet")
            .build()
            .unwrap();
        let network = NetworkConfig::new(
            settings,
            vec![
                NodeConfig::new("one", 30334, 9944, true),
                NodeConfig::new("alice", 30336, 9946, false)
                    .with_binary_path("/bin/node-subtensor-next")
                    .with_args(vec!["--alice".into()]),
            ],
        )
        .unwrap();

        let one = NodeDescriptor::from_config(&network, &network.nodes()[0]);
        let alice = NodeDescriptor::from_config(&network, &network.nodes()[1]);

        assert_eq!(one.binary_path(), Path::new("/bin/node-subtensor"));
        assert_eq!(one.base_path(), Path::new("/tmp/localnet/one"));
        assert!(one.is_validator());
        assert_eq!(one.log_path(), PathBuf::from("/tmp/localnet/one/one.log"));
        assert_eq!(alice.binary_path(), Path::new("/bin/node-subtensor-next"));
        assert!(!alice.is_validator());
        assert_eq!(alice.args(), ["--alice".to_string()]);
    }

    #[test]
    fn with_binary_path_should_keep_the_rest_of_the_descriptor() {
        let descriptor = NodeDescriptor::new("two", "/bin/old", "/tmp/localnet/two", 30335, 9945)
            .with_validator(true);

        let swapped = descriptor.clone().with_binary_path("/bin/new");

        assert_eq!(swapped.binary_path(), Path::new("/bin/new"));
        assert_eq!(swapped.base_path(), descriptor.base_path());
        assert_eq!(swapped.port(), 30335);
        assert_eq!(swapped.rpc_port(), 9945);
        assert!(swapped.is_validator());
    }

    #[test]
    fn mark_exited_should_only_count_nodes_nobody_was_stopping() {
        let stopping = NodeStatus::running();
        assert!(stopping.begin_stop());
        assert!(!stopping.mark_exited());
        assert!(!stopping.exited_unexpectedly());

        let crashed = NodeStatus::running();
        assert!(crashed.mark_exited());
        assert!(crashed.exited_unexpectedly());
        assert_eq!(crashed.lifecycle(), NodeLifecycle::Running);
    }
}
