// ABOUTME: Transport trait for running rendered scripts on hosts and reading files back.
// ABOUTME: ShellTransport pipes scripts to sh locally or over the ssh client binary.

use crate::error::{ProvisionError, Result};
use crate::script::{render_read, render_script, Script, READ_ABSENT_STATUS};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of one script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs provisioning scripts on target hosts.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a script on `host`. A non-zero exit is reported through
    /// [`ExecOutput::status`], not as an error.
    async fn execute(&self, host: &str, script: &Script) -> Result<ExecOutput>;

    /// Read a file from `host`. `Ok(None)` means the file does not exist.
    async fn read_file(&self, host: &str, path: &str) -> Result<Option<String>>;
}

/// Hosts that are reached without ssh.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "")
}

/// Transport that feeds rendered scripts to `sh -s`, through `ssh` for remote hosts.
#[derive(Debug, Clone)]
pub struct ShellTransport {
    ssh_binary: String,
    ssh_options: Vec<String>,
    shell: String,
}

impl Default for ShellTransport {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            ssh_options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            shell: "sh".to_string(),
        }
    }
}

impl ShellTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ssh_binary(mut self, binary: impl Into<String>) -> Self {
        self.ssh_binary = binary.into();
        self
    }

    pub fn with_ssh_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options = options;
        self
    }

    fn command_for(&self, host: &str) -> Command {
        if is_local_host(host) {
            let mut cmd = Command::new(&self.shell);
            cmd.arg("-s");
            cmd
        } else {
            let mut cmd = Command::new(&self.ssh_binary);
            cmd.args(&self.ssh_options)
                .arg("--")
                .arg(host)
                .arg(format!("{} -s", self.shell));
            cmd
        }
    }

    async fn run_text(&self, host: &str, label: &str, text: &str) -> Result<ExecOutput> {
        let spawn_err = |source: std::io::Error| ProvisionError::Spawn {
            host: host.to_string(),
            step: label.to_string(),
            source,
        };

        let mut child = self
            .command_for(host)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await.map_err(spawn_err)?;
            // Dropping stdin closes the pipe so sh sees EOF.
        }

        let output = child.wait_with_output().await.map_err(spawn_err)?;
        Ok(ExecOutput {
            // Killed by a signal: no exit code.
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl Transport for ShellTransport {
    async fn execute(&self, host: &str, script: &Script) -> Result<ExecOutput> {
        let text = render_script(script);
        tracing::debug!(host = %host, step = %script.label, script = %text, "Running script");
        self.run_text(host, &script.label, &text).await
    }

    async fn read_file(&self, host: &str, path: &str) -> Result<Option<String>> {
        let label = format!("read {path}");
        let output = self
            .run_text(host, &label, &render_read(path))
            .await
            .map_err(|e| ProvisionError::Transfer {
                host: host.to_string(),
                path: path.to_string(),
                message: e.to_string(),
            })?;

        match output.status {
            0 => Ok(Some(output.stdout)),
            READ_ABSENT_STATUS => Ok(None),
            status => Err(ProvisionError::Transfer {
                host: host.to_string(),
                path: path.to_string(),
                message: format!("exit status {status}: {}", output.stderr.trim()),
            }),
        }
    }
}
