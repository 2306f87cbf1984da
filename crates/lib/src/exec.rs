//! Agent execution: run the external agent CLI for one task, bounded by a timeout.
//! No shell is used; arguments are passed as a list so the task text needs no quoting.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::config::{self, Config};

/// Reply used when the agent exits cleanly without printing anything.
pub const EMPTY_OUTPUT_SENTINEL: &str = "Task completed successfully.";

/// How long a terminated agent gets to exit before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Task timed out after {}", describe_duration(.0))]
    Timeout(Duration),
    /// Non-zero exit; carries trimmed stderr or the exit code.
    #[error("{0}")]
    ExecutionFailed(String),
}

/// Runs one task to completion. Implemented by [`AgentExecutor`]; the gateway only sees this trait.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, task: &str, continue_session: bool) -> Result<String, ExecError>;
}

/// Spawns `<command> [-c] -p <task> --dangerously-skip-permissions --print` in the workspace.
#[derive(Debug, Clone)]
pub struct AgentExecutor {
    command: String,
    workspace: PathBuf,
    timeout: Duration,
    mirror_output: bool,
}

impl AgentExecutor {
    pub fn new(command: impl Into<String>, workspace: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            workspace: workspace.into(),
            timeout,
            mirror_output: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.agent.command.clone(),
            config::resolve_workspace_dir(config),
            config.agent.timeout(),
        )
        .with_mirror_output(config.agent.mirror_output)
    }

    /// Copy agent stdout to this process's stdout as it arrives.
    pub fn with_mirror_output(mut self, mirror: bool) -> Self {
        self.mirror_output = mirror;
        self
    }

    pub fn workspace(&self) -> &std::path::Path {
        &self.workspace
    }

    fn build_command(&self, task: &str, continue_session: bool) -> Command {
        let mut std_cmd = std::process::Command::new(&self.command);
        std_cmd
            .args(agent_args(task, continue_session))
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group so a timeout reaches whatever the agent started.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Argument list for the agent; `-c` resumes its previous session.
pub fn agent_args(task: &str, continue_session: bool) -> Vec<String> {
    let mut args = Vec::with_capacity(5);
    if continue_session {
        args.push("-c".to_string());
    }
    args.push("-p".to_string());
    args.push(task.to_string());
    args.push("--dangerously-skip-permissions".to_string());
    args.push("--print".to_string());
    args
}

#[async_trait]
impl AgentRunner for AgentExecutor {
    async fn run(&self, task: &str, continue_session: bool) -> Result<String, ExecError> {
        log::debug!(
            "spawning {} (continue: {}, cwd: {})",
            self.command,
            continue_session,
            self.workspace.display()
        );
        let mut child = self
            .build_command(task, continue_session)
            .spawn()
            .map_err(|source| ExecError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;
        log::debug!("agent started with pid {:?}", child.id());

        let stdout = tokio::spawn(drain(child.stdout.take(), self.mirror_output));
        let stderr = tokio::spawn(drain(child.stderr.take(), false));

        let finished = tokio::time::timeout(self.timeout, async {
            let status = child.wait().await;
            let out = stdout.await.unwrap_or_default();
            let err = stderr.await.unwrap_or_default();
            (status, out, err)
        })
        .await;

        let (status, out, err) = match finished {
            Ok(done) => done,
            Err(_) => {
                log::warn!("agent exceeded {:?}, terminating", self.timeout);
                terminate(&mut child).await;
                return Err(ExecError::Timeout(self.timeout));
            }
        };
        let status = status
            .map_err(|e| ExecError::ExecutionFailed(format!("waiting for agent: {}", e)))?;
        log::debug!("agent exited: {}", status);
        outcome(
            status,
            &String::from_utf8_lossy(&out),
            &String::from_utf8_lossy(&err),
        )
    }
}

fn outcome(status: ExitStatus, stdout: &str, stderr: &str) -> Result<String, ExecError> {
    if status.success() {
        let out = stdout.trim();
        return Ok(if out.is_empty() {
            EMPTY_OUTPUT_SENTINEL.to_string()
        } else {
            out.to_string()
        });
    }
    let err = stderr.trim();
    let msg = if !err.is_empty() {
        err.to_string()
    } else {
        match status.code() {
            Some(code) => format!("Process exited with code {}", code),
            None => "Process terminated by signal".to_string(),
        }
    };
    Err(ExecError::ExecutionFailed(msg))
}

/// Read a child stream to EOF, optionally echoing each read to stdout.
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, mirror: bool) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut collected = Vec::new();
    let mut buf = [0u8; 8192];
    let mut echo = tokio::io::stdout();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                collected.extend_from_slice(&buf[..n]);
                if mirror {
                    let _ = echo.write_all(&buf[..n]).await;
                    let _ = echo.flush().await;
                }
            }
            Err(e) => {
                log::debug!("agent stream read error: {}", e);
                break;
            }
        }
    }
    collected
}

/// SIGTERM the agent's process group, then SIGKILL the group if it does not exit in time.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::{
            sys::signal::{killpg, Signal},
            unistd::Pid,
        };

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                log::debug!("SIGTERM to agent group {} failed: {}", pid, e);
                let _ = child.start_kill();
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(status)) => log::debug!("terminated agent exited: {}", status),
        Ok(Err(e)) => log::warn!("error waiting for terminated agent: {}", e),
        Err(_) => {
            log::warn!("agent ignored SIGTERM, killing");
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                use nix::{
                    sys::signal::{killpg, Signal},
                    unistd::Pid,
                };

                if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                    log::debug!("SIGKILL to agent group {} failed: {}", pid, e);
                }
            }
            let _ = child.kill().await;
        }
    }
}

/// "20 minutes", "1 minute", "90 seconds".
fn describe_duration(d: &Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let mins = secs / 60;
        format!("{} minute{}", mins, if mins == 1 { "" } else { "s" })
    } else if secs >= 1 {
        format!("{} second{}", secs, if secs == 1 { "" } else { "s" })
    } else {
        format!("{} ms", d.as_millis())
    }
}
