use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

/// Captured output of a managed child process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("child io: {0}")]
    Io(#[from] std::io::Error),

    #[error("process timed out after {0:?}")]
    TimedOut(Duration),
}

/// A child process managed within its own process group.
/// Killing the group also takes down any grandchildren holding our pipes.
pub struct ManagedChild {
    child: tokio::process::Child,
    pgid: i32,
}

impl ManagedChild {
    /// Spawn `cmd` as the leader of a new session, with piped stdout/stderr.
    fn spawn(
        cmd: &mut Command,
    ) -> Result<(Self, tokio::process::ChildStdout, tokio::process::ChildStderr), ProcessError>
    {
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| ProcessError::Spawn { program, source })?;
        let pid = child.id().ok_or_else(|| {
            ProcessError::Io(std::io::Error::other("child exited before its pid was read"))
        })? as i32;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("stdout not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("stderr not piped")))?;

        Ok((Self { child, pgid: pid }, stdout, stderr))
    }

    /// Kill the entire process group: SIGTERM, then SIGKILL after `grace_period`.
    pub async fn kill_group(&mut self, grace_period: Duration) {
        if let Err(e) = kill(Pid::from_raw(-self.pgid), Signal::SIGTERM) {
            // ESRCH: already gone
            if e != nix::errno::Errno::ESRCH {
                warn!("SIGTERM to process group {} failed: {e}", self.pgid);
            }
            return;
        }

        if tokio::time::timeout(grace_period, self.child.wait())
            .await
            .is_err()
        {
            if let Err(e) = kill(Pid::from_raw(-self.pgid), Signal::SIGKILL) {
                if e != nix::errno::Errno::ESRCH {
                    warn!("SIGKILL to process group {} failed: {e}", self.pgid);
                }
            }
            let _ = self.child.wait().await;
        }
    }
}

/// Run `cmd` in its own process group. If `timeout` fires, the whole group is
/// killed (SIGTERM, grace period, SIGKILL) and `ProcessError::TimedOut` returned.
pub async fn run_managed_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    kill_grace: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let (mut managed, mut stdout, mut stderr) = ManagedChild::spawn(cmd)?;

    let result = tokio::time::timeout(timeout, async {
        let mut stdout_bytes = Vec::new();
        let mut stderr_bytes = Vec::new();
        let (_, _, status) = tokio::try_join!(
            stdout.read_to_end(&mut stdout_bytes),
            stderr.read_to_end(&mut stderr_bytes),
            managed.child.wait()
        )?;
        Ok::<_, std::io::Error>((stdout_bytes, stderr_bytes, status))
    })
    .await;

    match result {
        Ok(Ok((stdout_bytes, stderr_bytes, status))) => Ok(ProcessOutput {
            success: status.success(),
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            exit_code: status.code().unwrap_or(-1),
        }),
        Ok(Err(e)) => Err(ProcessError::Io(e)),
        Err(_elapsed) => {
            info!(
                "process timed out after {:?}, killing process group",
                timeout
            );
            managed.kill_group(kill_grace).await;
            Err(ProcessError::TimedOut(timeout))
        }
    }
}
