use crate::errors::OracleError;
use crate::oracle::{Oracle, OracleRequest};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Oracle adapter that shells out to the Claude CLI.
///
/// The rendered request goes in via stdin, the completion comes back on
/// stdout. A timeout is treated like any other transport failure.
pub struct ClaudeCliOracle {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ClaudeCliOracle {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: vec!["--print".to_string()],
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the argument list entirely.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_skip_permissions(mut self, skip: bool) -> Self {
        let flag = "--dangerously-skip-permissions".to_string();
        if skip && !self.args.contains(&flag) {
            self.args.push(flag);
        }
        self
    }

    async fn invoke(&self, prompt: &str) -> Result<String, OracleError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            OracleError::Transport(format!("failed to spawn '{}': {}", self.command, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| OracleError::Transport(format!("failed to write prompt: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| OracleError::Transport(format!("failed to close stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OracleError::Transport(format!("failed to wait for process: {}", e)))?;

        if !output.status.success() {
            return Err(OracleError::Transport(format!(
                "'{}' exited with code {}",
                self.command,
                output.status.code().unwrap_or(-1)
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| OracleError::Malformed(format!("non-UTF8 oracle output: {}", e)))
    }
}

#[async_trait]
impl Oracle for ClaudeCliOracle {
    async fn complete(&self, request: OracleRequest) -> Result<String, OracleError> {
        let prompt = request.rendered();
        debug!(chars = prompt.len(), command = %self.command, "invoking reasoning oracle");

        match tokio::time::timeout(self.timeout, self.invoke(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}
