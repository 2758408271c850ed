//! The protocol engine: one receive loop per session plus the send path.
//!
//! Every inbound datagram goes through the same pipeline:
//!
//! 1. length check, short datagrams are reported as
//!    [`ConnectionProblem::InvalidLength`]
//! 2. the test server's shutdown signal (debug builds only)
//! 3. pre-processing by sequence number: console messages are always
//!    acknowledged, repeats are dropped (command response parts are let
//!    through so the assembly can finish)
//! 4. checksum verification, failures are reported as
//!    [`ConnectionProblem::Corrupted`]
//! 5. decoding and dispatch to the [`ResponseRegistry`] or the console
//!    message channel
//!
//! While waiting for the next datagram the loop wakes at least once a second
//! to drive the keep-alive monitor.

use crate::config::ClientConfig;
use crate::error::RconError;
use crate::events::{ConnectionProblem, ConsoleMessage, SessionState, ShutdownReason};
use crate::keepalive::{keep_alive_needed, KeepAliveAction, KeepAliveMonitor};
use crate::metrics::{MetricsSnapshot, RconMetrics};
use crate::multipart::ResponsePart;
use crate::pending::{PendingResponse, ResponseRegistry};
use crate::sequence::SequenceTracker;
use crate::transport::Transport;
use log::{debug, error, info, trace, warn};
use shared::{DatagramType, DecodeError, RawDatagram, Request, Response, MIN_DATAGRAM_LEN};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Receiving ends of the engine's event channels.
#[derive(Debug)]
pub struct EngineEvents {
    pub messages: mpsc::UnboundedReceiver<ConsoleMessage>,
    pub problems: mpsc::UnboundedReceiver<ConnectionProblem>,
}

struct EngineShared {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    registry: ResponseRegistry,
    metrics: RconMetrics,
    next_sequence: AtomicU8,
    last_command_sent: Mutex<Instant>,
    /// Answered command sequences; cleared again when a sequence is reused.
    command_sequences: Mutex<SequenceTracker>,
    shutdown_reason: Mutex<Option<ShutdownReason>>,
    fatal: Mutex<Option<String>>,
    closing: Notify,
    state_tx: watch::Sender<SessionState>,
    messages_tx: mpsc::UnboundedSender<ConsoleMessage>,
    problems_tx: mpsc::UnboundedSender<ConnectionProblem>,
}

pub struct Engine {
    shared: Arc<EngineShared>,
    task: Mutex<Option<JoinHandle<io::Result<()>>>>,
    started: AtomicBool,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> (Self, EngineEvents) {
        let (messages_tx, messages) = mpsc::unbounded_channel();
        let (problems_tx, problems) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Idle);

        // Defers the first keep-alive check by the grace period.
        let now = Instant::now();
        let seeded = now
            .checked_sub(config.keep_alive_period)
            .map(|past| past + config.keep_alive_grace)
            .unwrap_or(now);

        let shared = Arc::new(EngineShared {
            transport,
            registry: ResponseRegistry::new(seeded),
            metrics: RconMetrics::new(),
            next_sequence: AtomicU8::new(0),
            last_command_sent: Mutex::new(seeded),
            command_sequences: Mutex::new(SequenceTracker::new()),
            shutdown_reason: Mutex::new(None),
            fatal: Mutex::new(None),
            closing: Notify::new(),
            state_tx,
            messages_tx,
            problems_tx,
            config,
        });

        (
            Self {
                shared,
                task: Mutex::new(None),
                started: AtomicBool::new(false),
            },
            EngineEvents { messages, problems },
        )
    }

    /// Spawns the receive loop. An engine runs at most once.
    pub fn start(&self) -> Result<(), RconError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RconError::AlreadyConnected);
        }

        self.shared.metrics.start(Instant::now());
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { shared.run().await });
        *lock(&self.task) = Some(handle);
        info!("Protocol engine started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Encodes and transmits `request`, registering it first if the server
    /// is expected to answer.
    pub async fn send(&self, request: &Request) -> io::Result<Option<PendingResponse>> {
        self.shared.send(request).await
    }

    /// Sends `command` with the next free sequence number.
    pub async fn send_command(&self, command: &str) -> io::Result<PendingResponse> {
        let sequence = self.shared.next_sequence();
        self.send_command_with_sequence(sequence, command).await
    }

    /// Sends `command` under a caller-chosen sequence number.
    ///
    /// If a request with the same sequence number is still waiting, its
    /// handle is returned and both copies may be executed by the server.
    pub async fn send_command_with_sequence(
        &self,
        sequence: u8,
        command: &str,
    ) -> io::Result<PendingResponse> {
        let request = Request::Command {
            sequence,
            command: command.to_string(),
        };
        self.shared
            .send(&request)
            .await?
            .ok_or_else(|| io::Error::other("command was not registered"))
    }

    /// Asks the receive loop to stop. The first reason wins.
    pub fn shutdown(&self, reason: ShutdownReason) {
        self.shared.request_shutdown(reason);
    }

    /// Stops the session and waits for the receive loop to finish.
    ///
    /// A loop that died on an error reports it here as [`RconError::Fatal`].
    pub async fn close(&self) -> Result<ShutdownReason, RconError> {
        self.shutdown(ShutdownReason::UserRequested);

        if !self.is_started() {
            self.shared.finish(ShutdownReason::UserRequested).await;
            return Ok(ShutdownReason::UserRequested);
        }
        self.join().await
    }

    /// Waits for the receive loop to end on its own.
    pub async fn join(&self) -> Result<ShutdownReason, RconError> {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(RconError::Fatal(err.to_string())),
                Err(join_err) => return Err(RconError::Fatal(join_err.to_string())),
            }
        } else {
            self.wait_for_disconnect().await;
        }

        match self.fatal_error() {
            Some(message) => Err(RconError::Fatal(message)),
            None => Ok(self
                .shutdown_reason()
                .unwrap_or(ShutdownReason::UserRequested)),
        }
    }

    pub async fn wait_for_disconnect(&self) -> ShutdownReason {
        let mut state_rx = self.shared.state_tx.subscribe();
        loop {
            if let Some(reason) = state_rx.borrow_and_update().shutdown_reason() {
                return reason;
            }
            if state_rx.changed().await.is_err() {
                return self
                    .shutdown_reason()
                    .unwrap_or(ShutdownReason::UserRequested);
            }
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Moves the session to `state` unless it has already ended.
    pub(crate) fn set_state(&self, state: SessionState) {
        self.shared.set_state(state);
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        *lock(&self.shared.shutdown_reason)
    }

    pub fn fatal_error(&self) -> Option<String> {
        lock(&self.shared.fatal).clone()
    }

    pub fn registry(&self) -> &ResponseRegistry {
        &self.shared.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.request_shutdown(ShutdownReason::UserRequested);
    }
}

impl EngineShared {
    fn next_sequence(&self) -> u8 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn last_command_sent(&self) -> Instant {
        *lock(&self.last_command_sent)
    }

    async fn send(&self, request: &Request) -> io::Result<Option<PendingResponse>> {
        let pending = self.registry.register_or_get(request);
        if let Request::Command { sequence, .. } = request {
            lock(&self.command_sequences).forget(*sequence);
        }

        let bytes = request.encode();
        self.transport.send(&bytes).await?;
        let sent_at = Instant::now();

        if let Some(pending) = &pending {
            pending.mark_sent(sent_at);
        }
        if let Request::Command { sequence, .. } = request {
            *lock(&self.last_command_sent) = sent_at;
            trace!("C#{:03} sent ({} bytes)", sequence, bytes.len());
        }
        self.metrics.record_outbound();
        Ok(pending)
    }

    fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        let mut current = lock(&self.shutdown_reason);
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        drop(current);

        debug!("Shutdown requested: {}", reason);
        self.closing.notify_one();
        true
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if matches!(current, SessionState::Disconnected(_)) || *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn report(&self, problem: ConnectionProblem) {
        warn!("Connection problem: {}", problem);
        let _ = self.problems_tx.send(problem);
    }

    async fn run(self: Arc<Self>) -> io::Result<()> {
        let mut buf = vec![0u8; self.config.receive_buffer_size.max(MIN_DATAGRAM_LEN)];
        let mut ticker = interval(self.config.effective_poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keep_alive: Option<KeepAliveMonitor> = None;
        let mut seen_messages = SequenceTracker::new();

        let outcome = loop {
            if lock(&self.shutdown_reason).is_some() {
                break Ok(());
            }

            tokio::select! {
                _ = self.closing.notified() => continue,

                _ = ticker.tick() => {
                    if let Err(err) = self.check_keep_alive(&mut keep_alive).await {
                        if !is_transient(&err) {
                            break Err(err);
                        }
                        debug!("Ignoring transient send error: {}", err);
                    }
                }

                result = self.transport.recv(&mut buf) => match result {
                    Ok(len) => {
                        if let Err(err) = self.handle_datagram(&buf[..len], &mut seen_messages).await {
                            if !is_transient(&err) {
                                break Err(err);
                            }
                            debug!("Ignoring transient send error: {}", err);
                        }
                    }
                    Err(err) if is_transient(&err) => {
                        debug!("Ignoring transient receive error: {}", err);
                    }
                    Err(err) => break Err(err),
                },
            }
        };

        let reason = match &outcome {
            Ok(()) => lock(&self.shutdown_reason).unwrap_or(ShutdownReason::UserRequested),
            Err(err) => {
                error!("Receive loop failed: {}", err);
                *lock(&self.fatal) = Some(err.to_string());
                self.request_shutdown(ShutdownReason::FatalException);
                ShutdownReason::FatalException
            }
        };
        self.finish(reason).await;
        outcome
    }

    /// Releases the transport and fires the terminal state change.
    async fn finish(&self, reason: ShutdownReason) {
        let reason = {
            let mut current = lock(&self.shutdown_reason);
            *current.get_or_insert(reason)
        };

        self.transport.close().await;
        self.registry.clear();
        self.metrics.stop(Instant::now());

        let changed = self.state_tx.send_if_modified(|state| {
            if matches!(state, SessionState::Disconnected(_)) {
                false
            } else {
                *state = SessionState::Disconnected(reason);
                true
            }
        });
        if changed {
            info!("Session closed: {}", reason);
        }
    }

    async fn check_keep_alive(&self, monitor: &mut Option<KeepAliveMonitor>) -> io::Result<()> {
        let now = Instant::now();
        if monitor.is_none()
            && keep_alive_needed(
                now,
                self.last_command_sent(),
                self.registry.last_acknowledged_sent_at(),
                self.config.keep_alive_period,
            )
        {
            let sequence = self.next_sequence();
            debug!("Server quiet, starting keep-alive round on C#{:03}", sequence);
            *monitor = Some(KeepAliveMonitor::new(
                sequence,
                self.config.keep_alive_interval,
                self.config.keep_alive_max_tries,
            ));
        }

        let Some(active) = monitor.as_mut() else {
            return Ok(());
        };

        match active.poll(now) {
            KeepAliveAction::Wait => {}
            KeepAliveAction::Send => {
                let request = Request::Command {
                    sequence: active.sequence(),
                    command: String::new(),
                };
                if let Some(pending) = self.send(&request).await? {
                    active.record_sent(pending, Instant::now());
                }
                self.metrics.record_keep_alive_sent();
                debug!(
                    "Keep-alive {}/{} sent",
                    active.tries(),
                    self.config.keep_alive_max_tries
                );
            }
            KeepAliveAction::Acknowledged => {
                self.metrics.record_keep_alive_acknowledged();
                debug!("Keep-alive acknowledged after {} tries", active.tries());
                *monitor = None;
            }
            KeepAliveAction::Expired => {
                warn!(
                    "No answer to {} keep-alives, giving up on the server",
                    active.tries()
                );
                *monitor = None;
                self.request_shutdown(ShutdownReason::NoResponseFromServer);
            }
        }
        Ok(())
    }

    async fn handle_datagram(
        &self,
        buf: &[u8],
        seen_messages: &mut SequenceTracker,
    ) -> io::Result<()> {
        let raw = RawDatagram::new(buf);
        let shutdown_signal = cfg!(debug_assertions) && raw.is_shutdown_signal();

        if !shutdown_signal && raw.len() < MIN_DATAGRAM_LEN {
            self.report(ConnectionProblem::InvalidLength);
            return Ok(());
        }
        self.metrics.record_inbound();

        if shutdown_signal {
            info!("Server sent the shutdown signal");
            self.request_shutdown(ShutdownReason::ServerRequested);
            return Ok(());
        }

        if !self.preprocess(&raw, seen_messages).await? {
            return Ok(());
        }

        let response = match Response::decode(buf) {
            Ok(response) => response,
            Err(DecodeError::ChecksumMismatch { expected, actual }) => {
                trace!("Checksum {:#010x} != {:#010x}", expected, actual);
                self.report(ConnectionProblem::Corrupted);
                return Ok(());
            }
            Err(DecodeError::BadHeader) => {
                self.report(ConnectionProblem::Corrupted);
                return Ok(());
            }
            Err(DecodeError::TooShort { .. }) | Err(DecodeError::Truncated(_)) => {
                self.report(ConnectionProblem::InvalidLength);
                return Ok(());
            }
            Err(DecodeError::UnknownType(kind)) => {
                debug!("Discarding datagram of unknown type {:#04x}", kind);
                return Ok(());
            }
        };
        self.metrics.record_parsed();

        self.dispatch(response, seen_messages);
        Ok(())
    }

    /// Returns `false` when the datagram needs no further processing.
    async fn preprocess(
        &self,
        raw: &RawDatagram<'_>,
        seen_messages: &SequenceTracker,
    ) -> io::Result<bool> {
        let Some(sequence) = raw.sequence() else {
            return Ok(true);
        };

        match raw.datagram_type() {
            Some(DatagramType::Message) => {
                trace!("M#{:03} received", sequence);
                self.send(&Request::Acknowledge { sequence }).await?;
                trace!("M#{:03} acknowledged", sequence);

                if self.config.discard_console_messages {
                    return Ok(false);
                }
                if seen_messages.contains(sequence) {
                    trace!("M#{:03} is a repeat", sequence);
                    return Ok(false);
                }
                Ok(true)
            }
            Some(DatagramType::Command) => {
                let repeated = lock(&self.command_sequences).contains(sequence);
                if repeated && !raw.is_multipart() {
                    trace!("C#{:03} response is a repeat", sequence);
                    return Ok(false);
                }
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    fn dispatch(&self, response: Response, seen_messages: &mut SequenceTracker) {
        match response {
            Response::Login { success } => {
                info!("Login {}", if success { "accepted" } else { "rejected" });
                if !self.registry.complete_login(success) {
                    debug!("Login response without a pending login");
                }
            }
            Response::Command { sequence, body } => {
                lock(&self.command_sequences).start_tracking(sequence);
                trace!("C#{:03} response ({} bytes)", sequence, body.len());
                if !self.registry.complete_command(sequence, body) {
                    trace!("C#{:03} response matches no pending command", sequence);
                }
            }
            Response::CommandPart {
                sequence,
                total,
                index,
                body,
            } => {
                lock(&self.command_sequences).start_tracking(sequence);
                trace!("C#{:03} part {}/{}", sequence, index + 1, total);
                let part = ResponsePart {
                    sequence,
                    total,
                    index,
                    body,
                };
                match self.registry.accept_part(part) {
                    Ok(true) => trace!("C#{:03} assembled from {} parts", sequence, total),
                    Ok(false) => {}
                    Err(err) => {
                        debug!("{}", err);
                        self.report(ConnectionProblem::Corrupted);
                    }
                }
            }
            Response::Message { sequence, text } => {
                seen_messages.start_tracking(sequence);
                self.metrics.record_console_message();
                let _ = self.messages_tx.send(ConsoleMessage { sequence, text });
            }
            Response::Shutdown => {
                debug!("Ignoring shutdown signal outside of test builds");
            }
        }
    }
}

/// ICMP errors surfaced by a connected UDP socket. The server may simply
/// not be up yet; liveness is left to the keep-alive monitor.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
