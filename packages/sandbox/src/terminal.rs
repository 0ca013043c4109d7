// ABOUTME: Terminal bridge streaming raw bytes between a duplex connection and a sandbox shell
// ABOUTME: Transport-agnostic over futures Stream/Sink so WebSockets and tests share one loop

use crate::error::{Result, SandboxError};
use crate::providers::ShellSession;
use crate::service::RunService;
use chrono::{DateTime, Duration, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const NOT_RUNNING_MESSAGE: &str = "Sandbox is not running. Run a command to start it.\r\n";
pub const STARTING_MESSAGE: &str = "Sandbox is starting. Reconnect in a moment.\r\n";

/// How a bridged session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// No sandbox existed; the status message was sent
    NotRunning,
    /// A record existed without a container handle
    Starting,
    /// The shell could not be opened; the error was sent as a message
    SetupFailed,
    /// The client went away first
    ClientClosed,
    /// The shell exited first and the connection was closed
    ShellExited,
}

pub struct TerminalBridge {
    service: Arc<RunService>,
    touch_interval: Duration,
}

impl TerminalBridge {
    pub fn new(service: Arc<RunService>, touch_interval: Duration) -> Self {
        Self {
            service,
            touch_interval,
        }
    }

    /// Bridge `inbound`/`outbound` to the shell of `project_id`'s sandbox.
    ///
    /// Returns an error only when `user_id` may not access the project; every
    /// later problem is reported as one message over the connection.
    pub async fn serve<S, K>(
        &self,
        user_id: &str,
        project_id: &str,
        mut inbound: S,
        mut outbound: K,
    ) -> Result<BridgeOutcome>
    where
        S: Stream<Item = Vec<u8>> + Send + Unpin,
        K: Sink<Vec<u8>> + Send + Unpin,
    {
        self.service.authorize(project_id, user_id).await?;

        let sandbox = match self.service.live_sandbox(project_id).await {
            Ok(Some(sandbox)) => sandbox,
            Ok(None) => {
                let _ = outbound.send(NOT_RUNNING_MESSAGE.as_bytes().to_vec()).await;
                drain(&mut inbound).await;
                return Ok(BridgeOutcome::NotRunning);
            }
            Err(SandboxError::ContainerUnavailable(id)) => {
                debug!("Sandbox {} has no container yet", id);
                let _ = outbound.send(STARTING_MESSAGE.as_bytes().to_vec()).await;
                drain(&mut inbound).await;
                return Ok(BridgeOutcome::Starting);
            }
            Err(e) => {
                let _ = outbound.send(error_message(&e)).await;
                drain(&mut inbound).await;
                return Ok(BridgeOutcome::SetupFailed);
            }
        };

        let container_id = sandbox.container_id.as_deref().unwrap_or_default();
        let shell = match self.service.runtime().open_shell(container_id).await {
            Ok(shell) => shell,
            Err(e) => {
                warn!("Failed to open shell in sandbox {}: {}", sandbox.id, e);
                let _ = outbound.send(error_message(&e)).await;
                drain(&mut inbound).await;
                return Ok(BridgeOutcome::SetupFailed);
            }
        };

        let opened_at = Utc::now();
        self.touch(&sandbox.id, opened_at).await;
        info!("Terminal attached to sandbox {}", sandbox.id);

        let outcome = self
            .bridge(&sandbox.id, shell, inbound, outbound, opened_at)
            .await;
        info!("Terminal detached from sandbox {} ({:?})", sandbox.id, outcome);
        Ok(outcome)
    }

    async fn bridge<S, K>(
        &self,
        sandbox_id: &str,
        shell: ShellSession,
        mut inbound: S,
        mut outbound: K,
        opened_at: DateTime<Utc>,
    ) -> BridgeOutcome
    where
        S: Stream<Item = Vec<u8>> + Send + Unpin,
        K: Sink<Vec<u8>> + Send + Unpin,
    {
        let ShellSession { mut output, mut input } = shell;
        // Shared by both directions so traffic either way counts as activity
        let last_touch = Mutex::new(opened_at);

        // shell -> connection
        let to_client = async {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bytes) => {
                        if outbound.send(bytes).await.is_err() {
                            debug!("Connection for {} stopped accepting output", sandbox_id);
                            return;
                        }
                        self.touch_throttled(sandbox_id, &last_touch).await;
                    }
                    Err(e) => {
                        warn!("Shell stream of {} failed: {}", sandbox_id, e);
                        break;
                    }
                }
            }
            let _ = outbound.close().await;
        };

        // connection -> shell
        let to_shell = async {
            while let Some(bytes) = inbound.next().await {
                if let Err(e) = input.write_all(&bytes).await {
                    debug!("Shell input of {} closed: {}", sandbox_id, e);
                    break;
                }
                if input.flush().await.is_err() {
                    break;
                }
                self.touch_throttled(sandbox_id, &last_touch).await;
            }
            let _ = input.shutdown().await;
        };

        tokio::select! {
            _ = to_client => BridgeOutcome::ShellExited,
            _ = to_shell => BridgeOutcome::ClientClosed,
        }
    }

    /// Touch at most once per `touch_interval`.
    async fn touch_throttled(&self, sandbox_id: &str, last_touch: &Mutex<DateTime<Utc>>) {
        let now = Utc::now();
        let due = {
            let mut last = last_touch
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if now - *last >= self.touch_interval {
                *last = now;
                true
            } else {
                false
            }
        };
        if due {
            self.touch(sandbox_id, now).await;
        }
    }

    async fn touch(&self, sandbox_id: &str, at: DateTime<Utc>) {
        if let Err(e) = self.service.registry().touch(sandbox_id, at).await {
            warn!("Failed to record activity for {}: {}", sandbox_id, e);
        }
    }
}

/// Idle until the client closes its side.
async fn drain<S>(inbound: &mut S)
where
    S: Stream<Item = Vec<u8>> + Unpin,
{
    while inbound.next().await.is_some() {}
}

fn error_message(e: &SandboxError) -> Vec<u8> {
    format!("Terminal error: {}\r\n", e).into_bytes()
}
