//! Host process execution.
//!
//! Every hypervisor interaction is an external program (`virsh`, `qemu-img`,
//! `virt-customize`, ...). [`ProcessRunner`] is the seam that lets the driver
//! be exercised against scripted output in tests, and [`RemoteRunner`] lets
//! the same driver manage a libvirt host over SSH.

use crate::config::RemoteHost;
use crate::error::{Result, VmError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Runs host programs and captures their output.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args` and return its trimmed stdout.
    ///
    /// # Errors
    /// Returns [`VmError::ToolMissing`] when the program is not installed,
    /// [`VmError::CommandTimeout`] when it outlives the runner's bound, and
    /// [`VmError::Command`] (carrying stderr) on a non-zero exit.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
///
/// Children are spawned with `kill_on_drop`, so cancelling the calling
/// future terminates the process instead of leaking it.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
    envs: Vec<(String, String)>,
}

impl SystemRunner {
    /// Create a runner that bounds every invocation by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            envs: Vec::new(),
        }
    }

    /// Set an environment variable for every child process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let start = std::time::Instant::now();
        tracing::trace!(program, args = %args.join(" "), "Running host command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                VmError::ToolMissing(program.to_string())
            } else {
                command_error(program, args, e.to_string())
            }
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| command_error(program, args, e.to_string()))?,
            Err(_) => {
                tracing::warn!(
                    program,
                    timeout_secs = self.timeout.as_secs(),
                    "Host command timed out"
                );
                return Err(VmError::CommandTimeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::trace!(
            program,
            elapsed_ms = start.elapsed().as_millis() as u64,
            status = %output.status,
            stdout = %stdout,
            "Host command finished"
        );

        if !output.status.success() {
            let message = if stderr.is_empty() {
                output.status.to_string()
            } else {
                format!("{}: {}", output.status, stderr)
            };
            return Err(command_error(program, args, message));
        }
        Ok(stdout)
    }
}

/// Exit status the shell uses for a command it cannot find.
const SHELL_NOT_FOUND: &str = "exit status: 127";

/// [`ProcessRunner`] that runs every program on a [`RemoteHost`] over SSH.
///
/// The program and its arguments are quoted into a single remote command
/// line, so arguments containing spaces or quotes reach the remote program
/// unchanged. A program the remote shell cannot find is reported as
/// [`VmError::ToolMissing`], like a missing local tool.
pub struct RemoteRunner {
    host: RemoteHost,
    inner: Arc<dyn ProcessRunner>,
}

impl RemoteRunner {
    /// Run `ssh` locally through `inner`.
    pub fn new(host: RemoteHost, inner: Arc<dyn ProcessRunner>) -> Self {
        Self { host, inner }
    }

    /// Host this runner targets.
    pub fn host(&self) -> &RemoteHost {
        &self.host
    }

    /// Local `ssh` arguments that run `program args...` on the host.
    pub fn ssh_args(&self, program: &str, args: &[&str]) -> Vec<String> {
        let remote = std::iter::once(program)
            .chain(args.iter().copied())
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ");
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            format!(
                "ConnectTimeout={}",
                self.host.connect_timeout.as_secs().max(1)
            ),
            "-p".into(),
            self.host.port.to_string(),
            self.host.destination(),
            "--".into(),
            remote,
        ]
    }
}

#[async_trait]
impl ProcessRunner for RemoteRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let ssh_args = self.ssh_args(program, args);
        let ssh_args: Vec<&str> = ssh_args.iter().map(String::as_str).collect();
        tracing::trace!(host = %self.host.address, program, "Running remote host command");

        match self.inner.run("ssh", &ssh_args).await {
            Err(VmError::Command { message, .. }) if message.starts_with(SHELL_NOT_FOUND) => {
                Err(VmError::ToolMissing(format!(
                    "{program} (on {})",
                    self.host.address
                )))
            }
            Err(VmError::Command { message, .. }) => Err(command_error(
                program,
                args,
                format!("on {}: {message}", self.host.address),
            )),
            other => other,
        }
    }
}

/// Single-quote `s` for a POSIX shell.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn command_error(program: &str, args: &[&str], message: String) -> VmError {
    VmError::Command {
        program: program.to_string(),
        args: args.join(" "),
        message,
    }
}
