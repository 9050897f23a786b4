//! Subprocess bridge client.
//!
//! Each session gets its own bridge process, spawned on `connect` and killed
//! when the client disconnects or is dropped. Requests and replies are JSON
//! Lines on the child's stdin/stdout (see `telebridge_bridge_protocol`).
//! The session worker issues one call at a time, so a client only ever has a
//! single request outstanding.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};
use ulid::Ulid;

use telebridge_bridge_protocol::{BridgeCommand, BridgeEvent, BridgeRequest, BridgeResult};

use super::{ClientError, ClientFactory, EntityRef, ImportResult, MessagingClient, Result};
use crate::config::{CredentialsConfig, SubprocessConfig};

/// Environment variables passed to every bridge process.
pub const ENV_PHONE: &str = "TELEBRIDGE_PHONE";
pub const ENV_SESSION_ID: &str = "TELEBRIDGE_SESSION_ID";
pub const ENV_API_ID: &str = "TELEBRIDGE_API_ID";
pub const ENV_API_HASH: &str = "TELEBRIDGE_API_HASH";

// ============================================================================
// Factory
// ============================================================================

/// Creates one [`SubprocessClient`] per session.
pub struct SubprocessFactory {
    config: SubprocessConfig,
    credentials: CredentialsConfig,
}

impl SubprocessFactory {
    pub fn new(config: SubprocessConfig, credentials: CredentialsConfig) -> Self {
        Self {
            config,
            credentials,
        }
    }
}

impl ClientFactory for SubprocessFactory {
    fn create(&self, session_id: &str, identity: &str) -> Box<dyn MessagingClient> {
        Box::new(SubprocessClient::new(
            session_id,
            identity,
            self.config.clone(),
            self.credentials.clone(),
        ))
    }

    fn backend(&self) -> &'static str {
        "subprocess"
    }
}

// ============================================================================
// Client
// ============================================================================

/// Messaging client backed by a bridge process.
pub struct SubprocessClient {
    session_id: String,
    identity: String,
    config: SubprocessConfig,
    credentials: CredentialsConfig,
    conn: Option<BridgeConnection>,
}

struct BridgeConnection {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl SubprocessClient {
    pub fn new(
        session_id: &str,
        identity: &str,
        config: SubprocessConfig,
        credentials: CredentialsConfig,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            identity: identity.to_string(),
            config,
            credentials,
            conn: None,
        }
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.call_timeout_seconds)
    }

    fn spawn_child(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .env(ENV_PHONE, &self.identity)
            .env(ENV_SESSION_ID, &self.session_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(api_id) = self.credentials.api_id {
            cmd.env(ENV_API_ID, api_id.to_string());
        }
        if let Some(api_hash) = &self.credentials.api_hash {
            cmd.env(ENV_API_HASH, api_hash);
        }

        cmd.spawn()
    }

    /// Spawn the bridge and wait for its `ready` event.
    async fn start_bridge(&self) -> Result<BridgeConnection> {
        let mut child = self
            .spawn_child()
            .map_err(|e| ClientError::Transport(format!("failed to spawn bridge: {e}")))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ClientError::Transport(
                "bridge stdio is not piped".to_string(),
            ));
        };
        let mut stdout = BufReader::new(stdout).lines();

        let (bridge, version) = tokio::time::timeout(self.call_timeout(), wait_ready(&mut stdout))
            .await
            .map_err(|_| ClientError::Timeout(self.config.call_timeout_seconds))??;
        info!(
            session_id = %self.session_id,
            bridge = %bridge,
            version = %version,
            "Bridge process ready"
        );

        Ok(BridgeConnection {
            child,
            stdin,
            stdout,
        })
    }

    /// Send one command and wait for its reply.
    async fn call(&mut self, command: BridgeCommand) -> Result<BridgeResult> {
        let timeout = self.call_timeout();
        let timeout_secs = self.config.call_timeout_seconds;
        let session_id = self.session_id.clone();
        let conn = self.conn.as_mut().ok_or(ClientError::NotConnected)?;

        let name = command.name();
        let request = BridgeRequest {
            request_id: Ulid::new().to_string(),
            command,
        };
        debug!(session_id = %session_id, command = name, request_id = %request.request_id, "Bridge call");

        let outcome = match tokio::time::timeout(timeout, exchange(conn, &request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Timeout(timeout_secs)),
        };

        // A broken pipe or a stalled bridge leaves the stream unusable.
        if matches!(
            outcome,
            Err(ClientError::Transport(_) | ClientError::Protocol(_) | ClientError::Timeout(_))
        ) {
            warn!(session_id = %session_id, command = name, "Dropping bridge connection");
            self.conn = None;
        }

        match outcome? {
            BridgeResult::Failed { code, message } => Err(ClientError::service(code, message)),
            result => Ok(result),
        }
    }

    async fn call_ok(&mut self, command: BridgeCommand) -> Result<()> {
        match self.call(command).await? {
            BridgeResult::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn call_entity(&mut self, command: BridgeCommand) -> Result<Option<EntityRef>> {
        match self.call(command).await? {
            BridgeResult::Entity { entity } => Ok(entity.map(EntityRef::from)),
            other => Err(unexpected(&other)),
        }
    }
}

async fn read_event(stdout: &mut Lines<BufReader<ChildStdout>>) -> Result<BridgeEvent> {
    loop {
        let line = stdout
            .next_line()
            .await
            .map_err(|e| ClientError::Transport(format!("failed to read from bridge: {e}")))?
            .ok_or_else(|| ClientError::Transport("bridge closed stdout".to_string()))?;

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<BridgeEvent>(&line) {
            Ok(event) => return Ok(event),
            Err(e) => warn!(line = %line, error = %e, "Failed to parse bridge event"),
        }
    }
}

async fn wait_ready(stdout: &mut Lines<BufReader<ChildStdout>>) -> Result<(String, String)> {
    loop {
        match read_event(stdout).await? {
            BridgeEvent::Ready { bridge, version } => return Ok((bridge, version)),
            BridgeEvent::Error { code, message, .. } => {
                return Err(ClientError::service(code, message));
            }
            other => debug!(event = ?other, "Ignoring bridge event before ready"),
        }
    }
}

async fn exchange(conn: &mut BridgeConnection, request: &BridgeRequest) -> Result<BridgeResult> {
    let json = serde_json::to_string(request)
        .map_err(|e| ClientError::Protocol(format!("failed to serialize request: {e}")))?;
    let line = format!("{json}\n");
    conn.stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ClientError::Transport(format!("failed to write to bridge: {e}")))?;
    conn.stdin
        .flush()
        .await
        .map_err(|e| ClientError::Transport(format!("failed to flush bridge stdin: {e}")))?;

    loop {
        match read_event(&mut conn.stdout).await? {
            BridgeEvent::Reply { request_id, result } if request_id == request.request_id => {
                return Ok(result);
            }
            BridgeEvent::Reply { request_id, .. } => {
                warn!(request_id = %request_id, "Discarding reply for unknown request");
            }
            BridgeEvent::Error {
                code,
                message,
                fatal: true,
            } => {
                return Err(ClientError::Transport(format!("{message} ({code})")));
            }
            BridgeEvent::Error { code, message, .. } => {
                warn!(code = %code, message = %message, "Bridge reported error");
            }
            BridgeEvent::Ready { .. } => {}
        }
    }
}

fn unexpected(result: &BridgeResult) -> ClientError {
    ClientError::Protocol(format!("unexpected reply: {result:?}"))
}

#[async_trait]
impl MessagingClient for SubprocessClient {
    async fn connect(&mut self) -> Result<()> {
        if self.conn.is_none() {
            self.conn = Some(self.start_bridge().await?);
        }
        self.call_ok(BridgeCommand::Connect).await
    }

    async fn is_authorized(&mut self) -> Result<bool> {
        match self.call(BridgeCommand::IsAuthorized).await? {
            BridgeResult::Authorized { authorized } => Ok(authorized),
            other => Err(unexpected(&other)),
        }
    }

    async fn request_code(&mut self, phone: &str) -> Result<()> {
        self.call_ok(BridgeCommand::RequestCode {
            phone: phone.to_string(),
        })
        .await
    }

    async fn verify_code(&mut self, phone: &str, code: &str) -> Result<()> {
        self.call_ok(BridgeCommand::VerifyCode {
            phone: phone.to_string(),
            code: code.to_string(),
        })
        .await
    }

    async fn resolve_entity(&mut self, phone: &str) -> Result<Option<EntityRef>> {
        self.call_entity(BridgeCommand::ResolveEntity {
            phone: phone.to_string(),
        })
        .await
    }

    async fn register_contact(&mut self, phone: &str) -> Result<ImportResult> {
        let command = BridgeCommand::ImportContact {
            phone: phone.to_string(),
            first_name: String::new(),
            last_name: String::new(),
        };
        match self.call(command).await? {
            BridgeResult::Imported { entities } => Ok(ImportResult {
                imported: entities.into_iter().map(EntityRef::from).collect(),
            }),
            other => Err(unexpected(&other)),
        }
    }

    async fn send_message(&mut self, to: &EntityRef, text: &str) -> Result<()> {
        self.call_ok(BridgeCommand::SendMessage {
            entity_id: to.id.clone(),
            text: text.to_string(),
        })
        .await
    }

    async fn get_self(&mut self) -> Result<EntityRef> {
        self.call_entity(BridgeCommand::GetSelf)
            .await?
            .ok_or_else(|| ClientError::Protocol("bridge returned no self entity".to_string()))
    }

    async fn log_out(&mut self) -> Result<()> {
        self.call_ok(BridgeCommand::LogOut).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.conn.is_none() {
            return Ok(());
        }

        let result = self.call_ok(BridgeCommand::Disconnect).await;

        if let Some(mut conn) = self.conn.take() {
            drop(conn.stdin);
            match tokio::time::timeout(Duration::from_secs(2), conn.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(session_id = %self.session_id, status = %status, "Bridge exited");
                }
                _ => {
                    let _ = conn.child.kill().await;
                }
            }
        }

        result
    }
}
