//! Running the external tool and signalling tunnel processes

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::TunnelError;

/// One bounded run of the tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub timeout: Duration,
    /// Send stdout/stderr here instead of pipes.
    ///
    /// Used for tunnel launches: the tool may outlive the wait, and a closed
    /// pipe would kill it on its next write.
    pub log_file: Option<PathBuf>,
}

impl Invocation {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            argv,
            timeout,
            log_file: None,
        }
    }

    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// What the tool left behind after exiting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` if it was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// The tool's own error text: stderr, or stdout when stderr is blank
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Runs tool invocations to completion or timeout
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, TunnelError>;
}

/// Runner that spawns real child processes
#[derive(Debug, Default)]
pub struct SystemToolRunner;

impl SystemToolRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, TunnelError> {
        let argv = &invocation.argv;
        let fail = |diagnostic: String| TunnelError::invocation_failed(argv, None, diagnostic);

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| fail("empty command".to_string()))?;

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());

        let log_offset = match &invocation.log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        fail(format!("cannot create log directory {:?}: {}", parent, e))
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| fail(format!("cannot open log file {:?}: {}", path, e)))?;
                let offset = file.metadata().map(|meta| meta.len()).unwrap_or(0);
                let stderr_file = file
                    .try_clone()
                    .map_err(|e| fail(format!("cannot open log file {:?}: {}", path, e)))?;
                command
                    .stdout(Stdio::from(file))
                    .stderr(Stdio::from(stderr_file));
                Some(offset)
            }
            None => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
                None
            }
        };

        debug!("Running `{}`", invocation.command_line());
        let child = command.spawn().map_err(|e| fail(e.to_string()))?;

        let output = match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|e| fail(e.to_string()))?,
            Err(_) => {
                // Dropping the child leaves the process running
                warn!(
                    "`{}` still running after {:?}",
                    invocation.command_line(),
                    invocation.timeout
                );
                return Err(TunnelError::InvocationTimedOut {
                    command: invocation.command_line(),
                    timeout: invocation.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = match (&invocation.log_file, log_offset) {
            (Some(path), Some(offset)) => {
                let bytes = tokio::fs::read(path).await.unwrap_or_default();
                let start = usize::try_from(offset).unwrap_or(0).min(bytes.len());
                String::from_utf8_lossy(&bytes[start..]).into_owned()
            }
            _ => String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            "`{}` exited with {:?}",
            invocation.command_line(),
            output.status.code()
        );

        Ok(ToolOutput {
            status: output.status.code(),
            stdout,
            stderr,
        })
    }
}

/// Stops a running process by pid
pub trait ProcessTerminator: Send + Sync {
    fn terminate(&self, pid: u32) -> Result<(), TunnelError>;
}

/// Terminator that sends SIGTERM
#[derive(Debug, Default)]
pub struct SignalTerminator;

impl SignalTerminator {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl ProcessTerminator for SignalTerminator {
    fn terminate(&self, pid: u32) -> Result<(), TunnelError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // 0 and negative pids address process groups, never a single tunnel
        let raw = i32::try_from(pid)
            .ok()
            .filter(|raw| *raw > 0)
            .ok_or(TunnelError::StaleReference { pid })?;

        debug!("Sending SIGTERM to {}", pid);
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(TunnelError::StaleReference { pid }),
            Err(Errno::EPERM) => Err(TunnelError::PermissionDenied { pid }),
            Err(e) => Err(TunnelError::InvocationFailed {
                command: format!("kill -TERM {}", pid),
                status: None,
                diagnostic: e.to_string(),
            }),
        }
    }
}

#[cfg(not(unix))]
impl ProcessTerminator for SignalTerminator {
    fn terminate(&self, pid: u32) -> Result<(), TunnelError> {
        use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

        let target = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

        let process = sys
            .process(target)
            .ok_or(TunnelError::StaleReference { pid })?;
        let sent = process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill());

        if sent {
            Ok(())
        } else {
            Err(TunnelError::PermissionDenied { pid })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let output = ToolOutput {
            status: Some(1),
            stdout: "usage: pitunnel ...".to_string(),
            stderr: "Error: invalid name\n".to_string(),
        };
        assert_eq!(output.diagnostic(), "Error: invalid name\n");
        assert!(!output.success());
    }

    #[test]
    fn test_diagnostic_falls_back_to_stdout() {
        let output = ToolOutput {
            status: Some(1),
            stdout: "Not logged in".to_string(),
            stderr: "  \n".to_string(),
        };
        assert_eq!(output.diagnostic(), "Not logged in");
    }

    #[test]
    fn test_invocation_builder() {
        let invocation = Invocation::new(
            vec!["pitunnel".to_string(), "--list".to_string()],
            Duration::from_secs(5),
        )
        .with_log_file(PathBuf::from("/tmp/pitunnel.log"));
        assert_eq!(invocation.command_line(), "pitunnel --list");
        assert_eq!(invocation.log_file, Some(PathBuf::from("/tmp/pitunnel.log")));
    }

    #[tokio::test]
    async fn test_missing_program_is_invocation_failure() {
        let invocation = Invocation::new(
            vec!["/nonexistent/pitunnel-binary".to_string()],
            Duration::from_secs(1),
        );
        let err = SystemToolRunner::new().run(&invocation).await.unwrap_err();
        assert!(matches!(
            err,
            TunnelError::InvocationFailed { status: None, .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_rejects_group_pids() {
        let err = SignalTerminator::new().terminate(0).unwrap_err();
        assert_eq!(err, TunnelError::StaleReference { pid: 0 });
    }
}
