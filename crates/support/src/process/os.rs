use std::{io, sync::Arc};

use async_trait::async_trait;
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tokio::sync::RwLock;
use tracing::debug;

use super::DynAsyncRead;
use crate::process::{Command, DynProcess, Process, ProcessManager};

#[derive(Debug)]
struct OsProcess {
    child: RwLock<tokio::process::Child>,
}

#[async_trait]
impl Process for OsProcess {
    async fn id(&self) -> Option<u32> {
        self.child.read().await.id()
    }

    async fn take_stdout(&self) -> Option<DynAsyncRead> {
        self.child
            .write()
            .await
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as DynAsyncRead)
    }

    async fn take_stderr(&self) -> Option<DynAsyncRead> {
        self.child
            .write()
            .await
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as DynAsyncRead)
    }

    async fn kill(&self) -> io::Result<()> {
        let mut child = self.child.write().await;

        // `id` is gone once the child was reaped
        let Some(raw_pid) = child.id() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "can't kill an exited process",
            ));
        };

        signal::kill(Pid::from_raw(raw_pid as i32), Signal::SIGTERM)?;
        let status = child.wait().await?;
        debug!("process {raw_pid} exited with {status}");

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct OsProcessManager;

impl OsProcessManager {
    fn create_base_command(command: Command) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(command.program.clone());

        if !command.args.is_empty() {
            cmd.args(command.args.clone());
        }

        if !command.envs.is_empty() {
            cmd.envs(command.envs.clone());
        }

        if let Some(stdin) = command.stdin {
            cmd.stdin(stdin);
        }

        if let Some(stdout) = command.stdout {
            cmd.stdout(stdout);
        }

        if let Some(stderr) = command.stderr {
            cmd.stderr(stderr);
        }

        if let Some(current_dir) = command.current_dir {
            cmd.current_dir(current_dir);
        }

        cmd
    }
}

#[async_trait]
impl ProcessManager for OsProcessManager {
    fn spawn(&self, command: Command) -> io::Result<DynProcess> {
        let kill_on_drop = command.kill_on_drop;
        let mut base_command = OsProcessManager::create_base_command(command);

        if kill_on_drop {
            base_command.kill_on_drop(true);
        }

        base_command.spawn().map(|child| {
            Arc::new(OsProcess {
                child: RwLock::new(child),
            }) as DynProcess
        })
    }

    async fn output(&self, command: Command) -> io::Result<std::process::Output> {
        let mut base_command = OsProcessManager::create_base_command(command);

        base_command.output().await
    }

    fn kill<T>(&self, pid: Pid, signal: T) -> nix::Result<()>
    where
        T: Into<Option<Signal>> + Send,
    {
        signal::kill(pid, signal)
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn output_should_capture_stdout_and_exit_status() {
        let pm = OsProcessManager;

        let output = pm
            .output(Command::new("sh").args(["-c", "echo spec; echo oops >&2; exit 3"]))
            .await
            .unwrap();

        assert_eq!(String::from_utf8_lossy(&output.stdout), "spec\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "oops\n");
        assert_eq!(output.status.code(), Some(3));
    }

    #[tokio::test]
    async fn spawn_should_fail_for_a_missing_binary() {
        let pm = OsProcessManager;

        let err = pm
            .spawn(Command::new("/definitely/not/a/node-subtensor"))
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn kill_should_terminate_and_then_report_already_exited() {
        let pm = OsProcessManager;
        let process = pm
            .spawn(
                Command::new("sh")
                    .args(["-c", "echo ready >&2; sleep 30"])
                    .stderr(Stdio::piped()),
            )
            .unwrap();

        let mut stderr = process.take_stderr().await.unwrap();
        let mut buf = [0u8; 6];
        stderr.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ready\n");

        process.kill().await.unwrap();
        assert!(process.id().await.is_none());

        let err = process.kill().await.unwrap_err();
        assert!(crate::process::is_already_exited(&err));
    }
}
