use crate::config::ClientConfig;
use crate::engine::{Engine, EngineEvents};
use crate::error::{RconError, RconResult};
use crate::events::{CommandResult, ConnectionProblem, ConsoleMessage, SessionState, ShutdownReason};
use crate::metrics::MetricsSnapshot;
use crate::pending::{PendingResponse, Reply};
use crate::transport::{Transport, UdpTransport};
use log::{debug, info, warn};
use shared::Request;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::{mpsc, watch};

/// A single RCon session with one server.
///
/// The lifecycle is `Idle -> Connecting -> Connected -> Disconnected(reason)`
/// and runs once: after a disconnect, build a new client to reconnect.
pub struct RconClient {
    engine: Engine,
    config: ClientConfig,
    messages: Option<mpsc::UnboundedReceiver<ConsoleMessage>>,
    problems: Option<mpsc::UnboundedReceiver<ConnectionProblem>>,
}

impl RconClient {
    /// Resolves `config.server` and opens a UDP socket connected to it.
    pub async fn bind(config: ClientConfig) -> RconResult<Self> {
        let server = lookup_host(config.server.as_str())
            .await
            .map_err(|err| RconError::InvalidAddress(format!("{}: {}", config.server, err)))?
            .next()
            .ok_or_else(|| RconError::InvalidAddress(config.server.clone()))?;

        let transport = UdpTransport::connect(server).await?;
        debug!(
            "Bound {} for server {}",
            transport.local_addr()?,
            server
        );
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (engine, EngineEvents { messages, problems }) =
            Engine::new(transport, config.clone());
        Self {
            engine,
            config,
            messages: Some(messages),
            problems: Some(problems),
        }
    }

    /// Starts the receive loop and logs in.
    ///
    /// On any failure the session is torn down before the error returns.
    pub async fn connect(&self) -> RconResult<()> {
        match self.engine.state() {
            SessionState::Idle => {}
            SessionState::Connecting | SessionState::Connected => {
                return Err(RconError::AlreadyConnected)
            }
            SessionState::Disconnected(_) => return Err(RconError::Closed),
        }

        self.engine.set_state(SessionState::Connecting);
        self.engine.start()?;
        info!("Logging in to {}", self.config.server);

        let login = Request::Login {
            password: self.config.password.clone(),
        };
        let pending = match self.engine.send(&login).await {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                self.teardown().await;
                return Err(RconError::Fatal("login was not registered".to_string()));
            }
            Err(err) => {
                self.teardown().await;
                return Err(err.into());
            }
        };

        if !pending.wait(self.config.login_timeout).await {
            self.engine.registry().forget(&pending);
            self.teardown().await;
            if let Some(message) = self.engine.fatal_error() {
                return Err(RconError::Fatal(message));
            }
            warn!("No login response within {:?}", self.config.login_timeout);
            return Err(RconError::Timeout(self.config.login_timeout));
        }

        match pending.reply() {
            Some(Reply::Login { success: true }) => {
                self.engine.set_state(SessionState::Connected);
                info!("Connected to {}", self.config.server);
                Ok(())
            }
            _ => {
                self.teardown().await;
                warn!("Login to {} rejected", self.config.server);
                Err(RconError::InvalidCredentials)
            }
        }
    }

    /// Sends `command` and waits up to the configured command timeout.
    pub async fn send_command(&self, command: &str) -> RconResult<CommandResult> {
        self.send_command_with_timeout(command, self.config.command_timeout)
            .await
    }

    /// A timeout is not an error: it yields an unsuccessful [`CommandResult`].
    pub async fn send_command_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> RconResult<CommandResult> {
        let pending = self.send_command_raw(command).await?;
        if !pending.wait(timeout).await {
            self.engine.registry().forget(&pending);
            debug!("{} timed out after {:?}", pending.key(), timeout);
            return Ok(CommandResult::failure());
        }
        Ok(command_result(&pending))
    }

    /// Sends `command` and hands back its pending response without waiting.
    pub async fn send_command_raw(&self, command: &str) -> RconResult<PendingResponse> {
        self.ensure_connected()?;
        Ok(self.engine.send_command(command).await?)
    }

    /// Sends `command` under an explicit sequence number.
    ///
    /// Reusing the sequence of a request still in flight returns that
    /// request's handle; the server executes both.
    pub async fn send_command_with_sequence(
        &self,
        sequence: u8,
        command: &str,
    ) -> RconResult<PendingResponse> {
        self.ensure_connected()?;
        Ok(self
            .engine
            .send_command_with_sequence(sequence, command)
            .await?)
    }

    /// Ends the session. Reports a receive loop failure if there was one.
    pub async fn disconnect(&self) -> RconResult<()> {
        if let SessionState::Disconnected(_) = self.engine.state() {
            return match self.engine.fatal_error() {
                Some(message) => Err(RconError::Fatal(message)),
                None => Ok(()),
            };
        }
        info!("Disconnecting from {}", self.config.server);
        self.engine.close().await.map(|_| ())
    }

    /// Console messages pushed by the server. Can be taken once.
    pub fn take_messages(&mut self) -> Option<mpsc::UnboundedReceiver<ConsoleMessage>> {
        self.messages.take()
    }

    /// Corrupted or malformed datagrams. Can be taken once.
    pub fn take_problems(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionProblem>> {
        self.problems.take()
    }

    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.engine.state().is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.engine.subscribe_state()
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.engine.state().shutdown_reason()
    }

    pub async fn wait_for_disconnect(&self) -> ShutdownReason {
        self.engine.wait_for_disconnect().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn ensure_connected(&self) -> RconResult<()> {
        match self.engine.state() {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected(_) => Err(RconError::Closed),
            SessionState::Idle | SessionState::Connecting => Err(RconError::NotConnected),
        }
    }

    async fn teardown(&self) {
        if let Err(err) = self.engine.close().await {
            debug!("Session ended with error during teardown: {}", err);
        }
    }
}

/// Turns a completed pending command into its result.
pub fn command_result(pending: &PendingResponse) -> CommandResult {
    match pending.reply() {
        Some(Reply::Command { body, .. }) => CommandResult::success(body),
        _ => CommandResult::failure(),
    }
}
