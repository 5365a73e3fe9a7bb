//! Scripted process manager for tests.
//!
//! Every spawned [`FakeProcess`] replays its stream values, one per `emit_interval`,
//! and then keeps repeating the last stderr value until it's killed, the same way a
//! node keeps printing its informant line.

use std::{
    collections::HashMap,
    ffi::OsString,
    io,
    os::unix::process::ExitStatusExt,
    process::ExitStatus,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use nix::{errno::Errno, sys::signal::Signal, unistd::Pid};
use tokio::{io::AsyncRead, sync::mpsc, task::JoinHandle};

use super::{Command, DynAsyncRead, DynProcess, Process, ProcessManager};

const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeProcessState {
    Running,
    Exited,
}

#[derive(Debug)]
pub struct FakeStdStream {
    rx: mpsc::UnboundedReceiver<String>,
    pending: Vec<u8>,
}

impl FakeStdStream {
    fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
        }
    }
}

impl AsyncRead for FakeStdStream {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.pending.is_empty() {
            match self.rx.poll_recv(cx) {
                std::task::Poll::Ready(Some(chunk)) => self.pending = chunk.into_bytes(),
                // all senders gone, report EOF
                std::task::Poll::Ready(None) => return std::task::Poll::Ready(Ok(())),
                std::task::Poll::Pending => return std::task::Poll::Pending,
            }
        }

        let n = buf.remaining().min(self.pending.len());
        buf.put_slice(&self.pending[..n]);
        self.pending.drain(..n);

        std::task::Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Clone)]
pub enum StreamValue {
    Stdout(String),
    Stderr(String),
}

#[derive(Debug)]
pub struct FakeProcess {
    pub id: u32,
    pub program: OsString,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
    pub kill_on_drop: bool,
    inner: RwLock<FakeProcessInner>,
    process_manager: FakeProcessManager,
}

#[derive(Debug)]
struct FakeProcessInner {
    state: FakeProcessState,
    stdout_tx: Option<mpsc::UnboundedSender<String>>,
    stderr_tx: Option<mpsc::UnboundedSender<String>>,
    stdout: Option<FakeStdStream>,
    stderr: Option<FakeStdStream>,
    emitter: Option<JoinHandle<()>>,
}

impl FakeProcess {
    pub fn state(&self) -> FakeProcessState {
        self.inner.read().unwrap().state
    }

    /// Whether `arg` was passed to the process.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value following `flag` in the arguments, if any.
    pub fn arg_value(&self, flag: &str) -> Option<String> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|index| self.args.get(index + 1))
            .map(|value| value.to_string_lossy().to_string())
    }

    /// Pushes a line to stderr right away, outside of the script.
    pub fn emit_stderr(&self, line: impl Into<String>) {
        if let Some(tx) = self.inner.read().unwrap().stderr_tx.as_ref() {
            let _ = tx.send(line.into());
        }
    }

    /// Simulates the process dying on its own.
    pub fn exit(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.state = FakeProcessState::Exited;
        inner.stdout_tx.take();
        inner.stderr_tx.take();
        if let Some(emitter) = inner.emitter.take() {
            emitter.abort();
        }
        drop(inner);

        self.process_manager
            .inner
            .write()
            .unwrap()
            .processes
            .remove(&self.id);
    }
}

#[async_trait]
impl Process for FakeProcess {
    async fn id(&self) -> Option<u32> {
        match self.state() {
            FakeProcessState::Running => Some(self.id),
            FakeProcessState::Exited => None,
        }
    }

    async fn take_stdout(&self) -> Option<DynAsyncRead> {
        self.inner
            .write()
            .unwrap()
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as DynAsyncRead)
    }

    async fn take_stderr(&self) -> Option<DynAsyncRead> {
        self.inner
            .write()
            .unwrap()
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as DynAsyncRead)
    }

    async fn kill(&self) -> io::Result<()> {
        if let Some(errno) = self.process_manager.inner.read().unwrap().node_kill_should_error {
            return Err(errno.into());
        }

        if self.state() == FakeProcessState::Exited {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "can't kill an exited process",
            ));
        }

        self.process_manager
            .inner
            .write()
            .unwrap()
            .killed
            .push(self.id);
        self.exit();

        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct FakeProcessManager {
    inner: Arc<RwLock<FakeProcessManagerInner>>,
}

#[derive(Debug)]
pub struct FakeProcessManagerInner {
    processes: HashMap<u32, Arc<FakeProcess>>,
    spawned: Vec<Arc<FakeProcess>>,
    streams: HashMap<OsString, Vec<StreamValue>>,
    arg_streams: HashMap<OsString, Vec<StreamValue>>,
    outputs: Vec<(OsString, Vec<OsString>)>,
    signals: Vec<(u32, Option<Signal>)>,
    killed: Vec<u32>,
    emit_interval: Duration,
    spawn_should_error: Option<io::ErrorKind>,
    output_should_fail: Option<ExitStatus>,
    output_should_error: Option<io::ErrorKind>,
    kill_should_error: Option<Errno>,
    node_kill_should_error: Option<Errno>,
}

impl Default for FakeProcessManager {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl FakeProcessManager {
    pub fn new(streams: HashMap<OsString, Vec<StreamValue>>) -> Self {
        FakeProcessManager {
            inner: Arc::new(RwLock::new(FakeProcessManagerInner {
                processes: HashMap::new(),
                spawned: Vec::new(),
                streams,
                arg_streams: HashMap::new(),
                outputs: Vec::new(),
                signals: Vec::new(),
                killed: Vec::new(),
                emit_interval: DEFAULT_EMIT_INTERVAL,
                spawn_should_error: None,
                output_should_error: None,
                output_should_fail: None,
                kill_should_error: None,
                node_kill_should_error: None,
            })),
        }
    }

    pub fn spawn_should_error(&self, err_kind: io::ErrorKind) {
        self.inner.write().unwrap().spawn_should_error = Some(err_kind);
    }

    pub fn output_should_error(&self, err_kind: io::ErrorKind) {
        self.inner.write().unwrap().output_should_error = Some(err_kind);
    }

    pub fn output_should_fail(&self, exit_code: ExitStatus) {
        self.inner.write().unwrap().output_should_fail = Some(exit_code);
    }

    pub fn kill_should_error(&self, errno: Errno) {
        self.inner.write().unwrap().kill_should_error = Some(errno);
    }

    pub fn node_kill_should_error(&self, errno: Errno) {
        self.inner.write().unwrap().node_kill_should_error = Some(errno);
    }

    pub fn clear_node_kill_error(&self) {
        self.inner.write().unwrap().node_kill_should_error = None;
    }

    pub fn set_emit_interval(&self, interval: Duration) {
        self.inner.write().unwrap().emit_interval = interval;
    }

    /// Script used by every process spawned from `program`.
    pub fn push_stream(&self, program: impl Into<OsString>, values: Vec<StreamValue>) {
        self.inner
            .write()
            .unwrap()
            .streams
            .insert(program.into(), values);
    }

    /// Script used by processes receiving `arg`, takes precedence over the program one.
    pub fn push_stream_for_arg(&self, arg: impl Into<OsString>, values: Vec<StreamValue>) {
        self.inner
            .write()
            .unwrap()
            .arg_streams
            .insert(arg.into(), values);
    }

    /// Processes still running.
    pub fn processes(&self) -> Vec<Arc<FakeProcess>> {
        self.inner
            .read()
            .unwrap()
            .processes
            .values()
            .map(Arc::clone)
            .collect()
    }

    /// Every process ever spawned, in spawn order.
    pub fn spawned(&self) -> Vec<Arc<FakeProcess>> {
        self.inner.read().unwrap().spawned.clone()
    }

    /// Latest running process that received `arg`.
    pub fn running_with_arg(&self, arg: &str) -> Option<Arc<FakeProcess>> {
        self.spawned()
            .into_iter()
            .rev()
            .find(|p| p.has_arg(arg) && p.state() == FakeProcessState::Running)
    }

    pub fn outputs(&self) -> Vec<(OsString, Vec<OsString>)> {
        self.inner.read().unwrap().outputs.clone()
    }

    pub fn signals(&self) -> Vec<(u32, Option<Signal>)> {
        self.inner.read().unwrap().signals.clone()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.inner.read().unwrap().killed.clone()
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap().processes.len()
    }

    fn script_for(&self, command: &Command) -> Vec<StreamValue> {
        let inner = self.inner.read().unwrap();
        command
            .args
            .iter()
            .find_map(|arg| inner.arg_streams.get(arg))
            .or_else(|| inner.streams.get(&command.program))
            .cloned()
            .unwrap_or_default()
    }

    fn next_id(&self) -> u32 {
        let inner = self.inner.read().unwrap();
        loop {
            let id = rand::random::<u16>() as u32 + 1;
            if !inner.spawned.iter().any(|p| p.id == id) {
                return id;
            }
        }
    }
}

fn spawn_emitter(
    values: Vec<StreamValue>,
    interval: Duration,
    stdout_tx: mpsc::UnboundedSender<String>,
    stderr_tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_stderr = None;
        for value in values {
            tokio::time::sleep(interval).await;
            let sent = match value {
                StreamValue::Stdout(chunk) => stdout_tx.send(chunk),
                StreamValue::Stderr(chunk) => {
                    last_stderr = Some(chunk.clone());
                    stderr_tx.send(chunk)
                },
            };
            if sent.is_err() {
                return;
            }
        }

        let Some(line) = last_stderr else {
            return;
        };
        loop {
            tokio::time::sleep(interval).await;
            if stderr_tx.send(line.clone()).is_err() {
                return;
            }
        }
    })
}

#[async_trait]
impl ProcessManager for FakeProcessManager {
    fn spawn(&self, command: Command) -> io::Result<DynProcess> {
        if let Some(err_kind) = self.inner.read().unwrap().spawn_should_error {
            return Err(err_kind.into());
        }

        let script = self.script_for(&command);
        let id = self.next_id();
        let interval = self.inner.read().unwrap().emit_interval;
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let emitter = spawn_emitter(script, interval, stdout_tx.clone(), stderr_tx.clone());

        let process = Arc::new(FakeProcess {
            id,
            program: command.program,
            args: command.args,
            envs: command.envs,
            kill_on_drop: command.kill_on_drop,
            inner: RwLock::new(FakeProcessInner {
                state: FakeProcessState::Running,
                stdout_tx: Some(stdout_tx),
                stderr_tx: Some(stderr_tx),
                stdout: Some(FakeStdStream::new(stdout_rx)),
                stderr: Some(FakeStdStream::new(stderr_rx)),
                emitter: Some(emitter),
            }),
            process_manager: self.clone(),
        });

        let mut inner = self.inner.write().unwrap();
        inner.processes.insert(process.id, Arc::clone(&process));
        inner.spawned.push(Arc::clone(&process));

        Ok(process)
    }

    async fn output(&self, command: Command) -> io::Result<std::process::Output> {
        if let Some(err_kind) = self.inner.read().unwrap().output_should_error {
            return Err(err_kind.into());
        }

        self.inner
            .write()
            .unwrap()
            .outputs
            .push((command.program.clone(), command.args.clone()));

        let stream_values = self
            .inner
            .read()
            .unwrap()
            .streams
            .get(&command.program)
            .cloned()
            .unwrap_or_default();

        let (stdout, stderr) = stream_values.into_iter().fold(
            (String::new(), String::new()),
            |(mut stdout, mut stderr), value| {
                match value {
                    StreamValue::Stdout(stdout_chunk) => stdout.push_str(&stdout_chunk),
                    StreamValue::Stderr(stderr_chunk) => stderr.push_str(&stderr_chunk),
                }
                (stdout, stderr)
            },
        );

        Ok(std::process::Output {
            status: self
                .inner
                .read()
                .unwrap()
                .output_should_fail
                .unwrap_or(ExitStatus::from_raw(0)),
            stdout: stdout.into_bytes(),
            stderr: stderr.into_bytes(),
        })
    }

    fn kill<T>(&self, pid: Pid, signal: T) -> nix::Result<()>
    where
        T: Into<Option<Signal>> + Send,
    {
        if let Some(errno) = self.inner.read().unwrap().kill_should_error {
            return Err(errno);
        }

        let pid = pid.as_raw() as u32;
        let signal = signal.into();
        let process = self.inner.read().unwrap().processes.get(&pid).cloned();
        let Some(process) = process else {
            return Err(Errno::ESRCH);
        };

        self.inner.write().unwrap().signals.push((pid, signal));
        if matches!(signal, Some(Signal::SIGTERM) | Some(Signal::SIGKILL)) {
            process.exit();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spawned_process_should_replay_its_script_and_repeat_the_last_line() {
        let pm = FakeProcessManager::default();
        pm.push_stream(
            "node",
            vec![
                StreamValue::Stderr("starting\n".into()),
                StreamValue::Stderr("💤 Idle (0 peers)\n".into()),
            ],
        );

        let process = pm.spawn(Command::new("node").args(["--one"])).unwrap();
        let mut lines = BufReader::new(process.take_stderr().await.unwrap()).lines();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), "starting");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "💤 Idle (0 peers)");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "💤 Idle (0 peers)");
    }

    #[tokio::test(start_paused = true)]
    async fn kill_should_close_the_streams_and_fail_the_second_time() {
        let pm = FakeProcessManager::default();
        pm.push_stream_for_arg("--one", vec![StreamValue::Stderr("💤 Idle\n".into())]);

        let process = pm.spawn(Command::new("node").args(["--one"])).unwrap();
        let mut lines = BufReader::new(process.take_stderr().await.unwrap()).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "💤 Idle");

        process.kill().await.unwrap();
        while lines.next_line().await.unwrap().is_some() {}

        assert_eq!(pm.count(), 0);
        assert!(process.id().await.is_none());
        assert_eq!(
            process.kill().await.unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[tokio::test]
    async fn kill_by_pid_should_fail_with_esrch_for_unknown_pids() {
        let pm = FakeProcessManager::default();

        assert_eq!(
            pm.kill(Pid::from_raw(123_456), Signal::SIGTERM),
            Err(Errno::ESRCH)
        );
    }

    #[tokio::test]
    async fn output_should_report_the_configured_failure() {
        let pm = FakeProcessManager::default();
        pm.push_stream("node", vec![StreamValue::Stderr("boom".into())]);
        pm.output_should_fail(ExitStatus::from_raw(1 << 8));

        let output = pm.output(Command::new("node")).await.unwrap();

        assert!(!output.status.success());
        assert_eq!(output.stderr, b"boom");
    }
}
