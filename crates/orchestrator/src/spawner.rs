use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use nix::{errno::Errno, sys::signal::Signal, unistd::Pid};
use support::{
    fs::FileSystem,
    process::{is_already_exited, Command, DynAsyncRead, DynProcess, ProcessManager},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncSeekExt, BufReader},
    sync::broadcast,
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{
    errors::OrchestratorError,
    network::node::{NodeDescriptor, NodeHandle, NodeLifecycle, NodeStatus},
};

/// Lines kept for slow subscribers before they start lagging.
const LOG_CHANNEL_CAPACITY: usize = 1024;
/// Time given to the readers to flush the last lines of a stopped node.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause between two reads of a log file that reached its end.
const LOG_TAIL_INTERVAL: Duration = Duration::from_millis(100);

/// Starts and stops node processes.
#[derive(Debug, Clone)]
pub struct Supervisor<PM, FS> {
    process_manager: PM,
    filesystem: FS,
    kill_on_drop: bool,
}

impl<PM, FS> Supervisor<PM, FS>
where
    PM: ProcessManager + Send + Sync,
    FS: FileSystem + Clone + Send + Sync + 'static,
{
    pub fn new(process_manager: PM, filesystem: FS) -> Self {
        Self {
            process_manager,
            filesystem,
            kill_on_drop: true,
        }
    }

    /// Whether dropping a handle kills its node, on by default.
    ///
    /// Without it nodes are meant to outlive the harness: on a filesystem
    /// backed by OS files they write straight to their log file, which is
    /// tailed for the subscribers.
    pub fn with_kill_on_drop(self, kill_on_drop: bool) -> Self {
        Self {
            kill_on_drop,
            ..self
        }
    }

    pub fn process_manager(&self) -> &PM {
        &self.process_manager
    }

    pub fn filesystem(&self) -> &FS {
        &self.filesystem
    }

    /// Spawns the node described by `descriptor` against `chain_spec`.
    ///
    /// Resolves as soon as the process exists, readiness is left to the probes.
    /// Both output streams end up in the node log file, stderr lines are also
    /// broadcast to the handle subscribers.
    pub async fn start(
        &self,
        descriptor: NodeDescriptor,
        chain_spec: &Path,
    ) -> Result<NodeHandle, OrchestratorError> {
        let name = descriptor.name().to_string();
        let spawn_err = |err| OrchestratorError::Spawn(name.clone(), err);
        self.filesystem
            .create_dir_all(descriptor.base_path())
            .await?;

        let log_file = if self.kill_on_drop {
            None
        } else {
            self.filesystem.open_append(descriptor.log_path()).await?
        };

        let command = Command::new(descriptor.binary_path())
            .args(node_args(&descriptor, chain_spec))
            .stdin(Stdio::null())
            .kill_on_drop(self.kill_on_drop);
        let (command, log_tail) = match log_file {
            Some(file) => {
                // opened before the spawn, so only this run's lines are tailed
                let tail = open_log_tail(&descriptor.log_path())
                    .await
                    .map_err(spawn_err)?;
                let stderr = file.try_clone().map_err(spawn_err)?;
                (command.stdout(file).stderr(stderr), Some(tail))
            },
            None => (
                command.stdout(Stdio::piped()).stderr(Stdio::piped()),
                None,
            ),
        };
        debug!("{name}: {}", command.display());

        let process = self.process_manager.spawn(command).map_err(spawn_err)?;
        let pid = process.id().await;
        info!(
            "🚀 {name} started from {}, pid {pid:?}",
            descriptor.binary_path().display()
        );

        let status = NodeStatus::running();
        let (logs, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        let output = NodeOutput {
            name,
            pid,
            log_path: descriptor.log_path(),
            filesystem: self.filesystem.clone(),
            status: status.clone(),
        };

        let mut log_tasks = vec![];
        if let Some(tail) = log_tail {
            log_tasks.push(output.tail(tail, process.clone(), logs.clone()));
        } else {
            if let Some(stdout) = process.take_stdout().await {
                log_tasks.push(output.clone().read(stdout, None));
            }
            if let Some(stderr) = process.take_stderr().await {
                log_tasks.push(output.read(stderr, Some(logs.clone())));
            }
        }

        Ok(NodeHandle::new(descriptor, process, pid, status, logs, log_tasks))
    }

    /// Terminates the node and waits for the process to be reaped.
    ///
    /// Stopping a node that is not running is a no-op, a process that already
    /// exited on its own counts as stopped.
    pub async fn stop(&self, node: &NodeHandle) -> Result<(), OrchestratorError> {
        if !node.begin_stop() {
            debug!("{}: not running ({:?}), nothing to stop", node.name(), node.lifecycle());
            return Ok(());
        }

        match node.process().kill().await {
            Ok(()) => info!("🛑 {} stopped", node.name()),
            Err(err) if is_already_exited(&err) => {
                warn!("⚠️ {} had already exited: {err}", node.name());
            },
            Err(err) => {
                node.set_lifecycle(NodeLifecycle::Running);
                return Err(OrchestratorError::Stop(node.name().to_string(), err));
            },
        }

        node.set_lifecycle(NodeLifecycle::Stopped);
        drain_log_tasks(node).await;

        Ok(())
    }

    /// Sends SIGTERM to a process we hold no handle for.
    ///
    /// Returns false when there was no such process anymore. Pid 0 would signal
    /// our own process group and is rejected with `EINVAL`.
    pub fn kill_pid(&self, pid: u32) -> Result<bool, Errno> {
        if pid == 0 {
            return Err(Errno::EINVAL);
        }
        let raw = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
        match self.process_manager.kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(errno) => Err(errno),
        }
    }
}

/// What the output tasks of one node share.
#[derive(Debug, Clone)]
struct NodeOutput<FS> {
    name: String,
    pid: Option<u32>,
    log_path: PathBuf,
    filesystem: FS,
    status: NodeStatus,
}

impl<FS> NodeOutput<FS>
where
    FS: FileSystem + Send + Sync + 'static,
{
    /// Copies a piped stream to the log file, line by line.
    fn read(
        self,
        stream: DynAsyncRead,
        subscribers: Option<broadcast::Sender<Arc<str>>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut buffer = Vec::new();

            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buffer);
                        if let Err(err) = self.filesystem.append(&self.log_path, line.as_bytes()).await {
                            debug!("{}: can't append to {}: {err}", self.name, self.log_path.display());
                        }

                        match &subscribers {
                            Some(subscribers) => self.publish(&line, subscribers),
                            None => trace!("{}: {}", self.name, line.trim_end()),
                        }
                    },
                    Err(err) => {
                        warn!("⚠️ {}: reading output failed: {err}", self.name);
                        break;
                    },
                }
            }

            // stdout and stderr close together, stderr speaks for both
            if subscribers.is_some() {
                self.closed();
            }
        })
    }

    /// Follows the log file a detached node writes to, until the process is
    /// reaped.
    fn tail(
        self,
        file: tokio::fs::File,
        process: DynProcess,
        subscribers: broadcast::Sender<Arc<str>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(file);
            let mut buffer = Vec::new();

            loop {
                match reader.read_until(b'\n', &mut buffer).await {
                    Ok(_) if buffer.ends_with(b"\n") => {
                        self.publish(&String::from_utf8_lossy(&buffer), &subscribers);
                        buffer.clear();
                    },
                    // end of the file for now, a partial line stays buffered
                    Ok(_) => {
                        if process.id().await.is_none() {
                            break;
                        }
                        tokio::time::sleep(LOG_TAIL_INTERVAL).await;
                    },
                    Err(err) => {
                        warn!("⚠️ {}: reading {} failed: {err}", self.name, self.log_path.display());
                        break;
                    },
                }
            }

            self.closed();
        })
    }

    fn publish(&self, line: &str, subscribers: &broadcast::Sender<Arc<str>>) {
        let line = line.trim_end_matches(['\n', '\r']);
        trace!("{}: {line}", self.name);
        // no receivers is fine
        let _ = subscribers.send(Arc::from(line));
    }

    fn closed(&self) {
        if self.status.mark_exited() {
            let pid = self.pid.map_or_else(|| "?".to_string(), |pid| pid.to_string());
            warn!(
                "⚠️ {} (pid {pid}) exited unexpectedly, last lines in {}",
                self.name,
                self.log_path.display()
            );
        } else {
            debug!("{}: output stream closed", self.name);
        }
    }
}

async fn open_log_tail(log_path: &Path) -> std::io::Result<tokio::fs::File> {
    let mut file = tokio::fs::File::open(log_path).await?;
    file.seek(SeekFrom::End(0)).await?;

    Ok(file)
}

/// Command line of a node process.
pub fn node_args(descriptor: &NodeDescriptor, chain_spec: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--{}", descriptor.name()),
        "--chain".into(),
        chain_spec.to_string_lossy().to_string(),
        "--base-path".into(),
        descriptor.base_path().to_string_lossy().to_string(),
        "--port".into(),
        descriptor.port().to_string(),
        "--rpc-port".into(),
        descriptor.rpc_port().to_string(),
    ];

    if descriptor.is_validator() {
        args.push("--validator".into());
    }

    args.extend(
        [
            "--rpc-cors=all",
            "--allow-private-ipv4",
            "--discover-local",
            "--unsafe-force-node-key-generation",
        ]
        .map(String::from),
    );
    args.extend(descriptor.args().iter().cloned());

    args
}

async fn drain_log_tasks(node: &NodeHandle) {
    let tasks = node.take_log_tasks();
    let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();

    if tokio::time::timeout(LOG_DRAIN_TIMEOUT, join_all(tasks))
        .await
        .is_err()
    {
        debug!("{}: output still open after stop, detaching readers", node.name());
        aborts.iter().for_each(|task| task.abort());
    }
}
