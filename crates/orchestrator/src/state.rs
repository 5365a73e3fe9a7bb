//! Versioned snapshot of a running network, used to reap it from another process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use support::{
    fs::{FileSystem, FileSystemError},
    process::ProcessManager,
};
use tracing::{info, warn};

use crate::spawner::Supervisor;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Unsupported network state version {0}, expected at most {STATE_VERSION}")]
    UnsupportedVersion(u32),
    #[error("Invalid network state: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("FileSystem error: {0}")]
    FileSystem(#[from] FileSystemError),
}

fn default_version() -> u32 {
    STATE_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub name: String,
    pub rpc_port: u16,
    pub port: u16,
    pub pid: Option<u32>,
    pub base_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    #[serde(default = "default_version")]
    pub version: u32,
    pub binary_path: PathBuf,
    pub chain_spec: PathBuf,
    pub nodes: Vec<NodeState>,
}

/// Difference between the nodes held in memory and the ones in the state file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Listed in the file but not held, only reachable by pid.
    pub orphans: Vec<NodeState>,
    /// Held but not listed yet.
    pub not_durable: Vec<String>,
}

/// Outcome of a teardown, which never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub stopped: Vec<String>,
    pub orphans_killed: Vec<String>,
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl NetworkState {
    pub fn new(binary_path: impl Into<PathBuf>, chain_spec: impl Into<PathBuf>) -> Self {
        Self {
            version: STATE_VERSION,
            binary_path: binary_path.into(),
            chain_spec: chain_spec.into(),
            nodes: vec![],
        }
    }

    pub async fn write<FS>(&self, filesystem: &FS, path: &Path) -> Result<(), StateError>
    where
        FS: FileSystem + Send + Sync,
    {
        let contents = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            filesystem.create_dir_all(parent).await?;
        }
        filesystem.write(path, contents).await?;

        Ok(())
    }

    pub async fn read<FS>(filesystem: &FS, path: &Path) -> Result<Self, StateError>
    where
        FS: FileSystem + Send + Sync,
    {
        let contents = filesystem.read(path).await?;
        let state: NetworkState = serde_json::from_slice(&contents)?;
        if state.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion(state.version));
        }

        Ok(state)
    }

    pub fn reconcile(&self, held: &[&str]) -> Reconciliation {
        let orphans = self
            .nodes
            .iter()
            .filter(|node| !held.contains(&node.name.as_str()))
            .cloned()
            .collect();
        let not_durable = held
            .iter()
            .filter(|name| !self.nodes.iter().any(|node| node.name == **name))
            .map(|name| name.to_string())
            .collect();

        Reconciliation {
            orphans,
            not_durable,
        }
    }
}

/// Kills the nodes listed in `path` by pid, then removes the chain-spec and the
/// state file. Meant for a different process than the one that spawned them.
pub async fn teardown_from_state<PM, FS>(
    process_manager: PM,
    filesystem: FS,
    path: &Path,
) -> TeardownReport
where
    PM: ProcessManager + Send + Sync,
    FS: FileSystem + Clone + Send + Sync + 'static,
{
    let mut report = TeardownReport::default();
    let state = match NetworkState::read(&filesystem, path).await {
        Ok(state) => state,
        Err(err) => {
            warn!("⚠️ can't read network state {}: {err}", path.display());
            report.failures.push(err.to_string());
            return report;
        },
    };

    let supervisor = Supervisor::new(process_manager, filesystem);
    kill_orphans(&supervisor, &state.nodes, &mut report);
    remove_artifacts(
        supervisor.filesystem(),
        &[state.chain_spec.as_path(), path],
        &mut report,
    )
    .await;

    report
}

pub(crate) fn kill_orphans<PM, FS>(
    supervisor: &Supervisor<PM, FS>,
    nodes: &[NodeState],
    report: &mut TeardownReport,
) where
    PM: ProcessManager + Send + Sync,
    FS: FileSystem + Clone + Send + Sync + 'static,
{
    for node in nodes {
        let Some(pid) = node.pid else {
            continue;
        };

        match supervisor.kill_pid(pid) {
            Ok(true) => {
                info!("🔪 {} (pid {pid}) killed", node.name);
                report.orphans_killed.push(node.name.clone());
            },
            Ok(false) => info!("{} (pid {pid}) was already gone", node.name),
            Err(errno) => {
                warn!("⚠️ can't kill {} (pid {pid}): {errno}", node.name);
                report
                    .failures
                    .push(format!("kill {} (pid {pid}): {errno}", node.name));
            },
        }
    }
}

pub(crate) async fn remove_artifacts<FS>(
    filesystem: &FS,
    paths: &[&Path],
    report: &mut TeardownReport,
) where
    FS: FileSystem + Send + Sync,
{
    for path in paths {
        match filesystem.remove_file(path).await {
            Ok(()) => info!("🧹 removed {}", path.display()),
            Err(err) if err.is_not_found() => {},
            Err(err) => {
                warn!("⚠️ can't remove {}: {err}", path.display());
                report
                    .failures
                    .push(format!("remove {}: {err}", path.display()));
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use support::{
        fs::in_memory::InMemoryFileSystem,
        process::{fake::FakeProcessManager, Command},
    };

    use super::*;

    const STATE_FILE: &str = "/tmp/localnet/network-state.json";
    const CHAIN_SPEC: &str = "/tmp/localnet/chain-spec.json";

    fn node(name: &str, pid: Option<u32>) -> NodeState {
        NodeState {
            name: name.into(),
            rpc_port: 9944,
            port: 30334,
            pid,
            base_path: PathBuf::from(format!("/tmp/localnet/{name}")),
        }
    }

    #[tokio::test]
    async fn state_should_be_written_as_camel_case_json() {
        let fs = InMemoryFileSystem::default();
        let mut state = NetworkState::new("/bin/node-subtensor", CHAIN_SPEC);
        state.nodes.push(node("one", Some(42)));

        state.write(&fs, Path::new(STATE_FILE)).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs.read_to_string(STATE_FILE).await.unwrap()).unwrap();
        assert_eq!(written["version"], 1);
        assert_eq!(written["binaryPath"], "/bin/node-subtensor");
        assert_eq!(written["chainSpec"], CHAIN_SPEC);
        assert_eq!(written["nodes"][0]["rpcPort"], 9944);
        assert_eq!(written["nodes"][0]["basePath"], "/tmp/localnet/one");
        assert_eq!(written["nodes"][0]["pid"], 42);
        assert_eq!(
            NetworkState::read(&fs, Path::new(STATE_FILE)).await.unwrap(),
            state
        );
    }

    #[tokio::test]
    async fn read_should_default_a_missing_version_and_reject_newer_ones() {
        let fs = InMemoryFileSystem::default();
        fs.create_dir_all("/tmp/localnet").await.unwrap();
        fs.write(
            STATE_FILE,
            r#"{"binaryPath":"/bin/node","chainSpec":"/tmp/spec.json","nodes":[]}"#,
        )
        .await
        .unwrap();

        let state = NetworkState::read(&fs, Path::new(STATE_FILE)).await.unwrap();
        assert_eq!(state.version, STATE_VERSION);

        fs.write(
            STATE_FILE,
            r#"{"version":2,"binaryPath":"/bin/node","chainSpec":"/tmp/spec.json","nodes":[]}"#,
        )
        .await
        .unwrap();
        let err = NetworkState::read(&fs, Path::new(STATE_FILE))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::UnsupportedVersion(2)));
    }

    #[test]
    fn reconcile_should_split_orphans_and_not_durable_nodes() {
        let mut state = NetworkState::new("/bin/node", CHAIN_SPEC);
        state.nodes = vec![node("one", Some(1)), node("two", Some(2))];

        let reconciliation = state.reconcile(&["one", "alice"]);

        assert_eq!(reconciliation.orphans, vec![node("two", Some(2))]);
        assert_eq!(reconciliation.not_durable, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn teardown_from_state_should_kill_listed_pids_and_clean_up() {
        let pm = FakeProcessManager::default();
        let fs = InMemoryFileSystem::default();
        let one = pm.spawn(Command::new("/bin/node").args(["--one"])).unwrap();
        let one_pid = one.id().await.unwrap();

        let mut state = NetworkState::new("/bin/node", CHAIN_SPEC);
        // two is long gone
        state.nodes = vec![node("one", Some(one_pid)), node("two", Some(65_000 + 600))];
        state.write(&fs, Path::new(STATE_FILE)).await.unwrap();
        fs.write(CHAIN_SPEC, "{}").await.unwrap();

        let report = teardown_from_state(pm.clone(), fs.clone(), Path::new(STATE_FILE)).await;

        assert_eq!(report.orphans_killed, vec!["one".to_string()]);
        assert!(report.is_clean());
        assert_eq!(pm.count(), 0);
        assert!(!fs.exists(STATE_FILE).await);
        assert!(!fs.exists(CHAIN_SPEC).await);
    }

    #[tokio::test]
    async fn teardown_from_state_should_skip_a_zero_pid() {
        let pm = FakeProcessManager::default();
        let fs = InMemoryFileSystem::default();
        let mut state = NetworkState::new("/bin/node", CHAIN_SPEC);
        state.nodes = vec![node("one", Some(0))];
        state.write(&fs, Path::new(STATE_FILE)).await.unwrap();

        let report = teardown_from_state(pm.clone(), fs.clone(), Path::new(STATE_FILE)).await;

        assert!(pm.signals().is_empty());
        assert!(report.orphans_killed.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("kill one (pid 0)"));
        assert!(!fs.exists(STATE_FILE).await);
    }

    #[tokio::test]
    async fn teardown_from_state_should_never_fail() {
        let report = teardown_from_state(
            FakeProcessManager::default(),
            InMemoryFileSystem::default(),
            Path::new(STATE_FILE),
        )
        .await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.orphans_killed.is_empty());
    }
}
