//! Standard I/O transport.
//!
//! Spawns the provider as a child process and exchanges newline-delimited
//! JSON over its stdin/stdout. Stderr is inherited so provider diagnostics
//! reach the terminal.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{DecodeErrors, StdioConfig, TransportKind};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::Transport;
use crate::error::TransportError;

/// Time allowed to exit after stdin is closed, before SIGTERM.
const STDIN_CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Grace period between SIGTERM and a hard kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// A provider running as a child process.
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Bytes of a line not yet terminated; kept across cancelled reads.
    line: Vec<u8>,
    decode_errors: DecodeErrors,
    connected: bool,
}

impl StdioTransport {
    /// Spawn the provider process described by `config`.
    ///
    /// `config.env` is layered over the inherited environment.
    pub async fn spawn(config: &StdioConfig) -> Result<Self, TransportError> {
        debug!(
            command = %config.command,
            args = ?config.args,
            "Starting stdio provider"
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdin"))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("Failed to capture stdout"))
        })?;

        debug!(pid = ?child.id(), "Stdio provider started");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            line: Vec::new(),
            decode_errors: config.decode_errors,
            connected: true,
        })
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<String, TransportError> {
        match self.decode_errors {
            DecodeErrors::Strict => Ok(String::from_utf8(bytes)?),
            DecodeErrors::Replace => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        debug!(frame = message, "stdio ->");

        self.stdin
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(TransportError::WriteError)?;
        self.stdin.flush().await.map_err(TransportError::WriteError)?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        loop {
            let bytes_read = self
                .stdout
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(TransportError::ReadError)?;

            if bytes_read == 0 {
                self.connected = false;
                return Err(TransportError::ConnectionClosed);
            }

            let line = std::mem::take(&mut self.line);
            let message = self.decode(line)?;
            let message = message.trim_end();

            // Blank keep-alive lines carry no message
            if message.is_empty() {
                continue;
            }

            debug!(frame = message, "stdio <-");
            return Ok(message.to_string());
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }

        debug!(pid = ?self.child.id(), "Stopping stdio provider");
        self.connected = false;

        // Closing stdin is the polite shutdown request for stdio servers
        let _ = self.stdin.shutdown().await;
        if let Ok(status) = tokio::time::timeout(STDIN_CLOSE_GRACE, self.child.wait()).await {
            debug!(status = ?status.ok(), "Stdio provider exited");
            return Ok(());
        }

        if let Some(pid) = self.child.id() {
            #[cfg(unix)]
            {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                if tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await.is_ok() {
                    debug!(pid, "Stdio provider exited on SIGTERM");
                    return Ok(());
                }
                warn!(pid, grace = ?TERMINATE_GRACE, "Stdio provider ignored SIGTERM; killing");
            }

            #[cfg(not(unix))]
            let _ = pid;
        }
        let _ = self.child.kill().await;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
