//! Correlation of outbound requests with their inbound responses.
//!
//! Every request that expects an answer is registered here before it is
//! written to the socket, so an immediate reply can never race past its
//! registration. The login uses a single slot, commands are keyed by their
//! one-byte sequence number. Callers wait on the returned
//! [`PendingResponse`] with a timeout while the receive loop completes it.

use crate::multipart::{AssemblyError, MultiPartAssembly, ResponsePart};
use log::trace;
use shared::Request;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// A response matched to the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Login { success: bool },
    Command { sequence: u8, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKey {
    Login,
    Command(u8),
}

impl std::fmt::Display for ResponseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseKey::Login => write!(f, "login"),
            ResponseKey::Command(sequence) => write!(f, "C#{:03}", sequence),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Waiting,
    Completed,
    Cancelled,
}

#[derive(Debug, Default)]
struct PendingState {
    reply: Option<Reply>,
    assembly: Option<MultiPartAssembly>,
}

#[derive(Debug)]
struct PendingInner {
    key: ResponseKey,
    sent_at: Mutex<Instant>,
    state: Mutex<PendingState>,
    status_tx: watch::Sender<Status>,
    status_rx: watch::Receiver<Status>,
}

/// Handle on one outstanding request.
///
/// Clones share the same state; completing any clone releases every waiter.
#[derive(Debug, Clone)]
pub struct PendingResponse {
    inner: Arc<PendingInner>,
}

impl PendingResponse {
    fn new(key: ResponseKey, sent_at: Instant) -> Self {
        let (status_tx, status_rx) = watch::channel(Status::Waiting);
        Self {
            inner: Arc::new(PendingInner {
                key,
                sent_at: Mutex::new(sent_at),
                state: Mutex::new(PendingState::default()),
                status_tx,
                status_rx,
            }),
        }
    }

    pub fn key(&self) -> ResponseKey {
        self.inner.key
    }

    /// When the request was last written to the socket.
    pub fn sent_at(&self) -> Instant {
        *lock(&self.inner.sent_at)
    }

    pub(crate) fn mark_sent(&self, at: Instant) {
        *lock(&self.inner.sent_at) = at;
    }

    pub fn is_completed(&self) -> bool {
        *self.inner.status_rx.borrow() == Status::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.status_rx.borrow() == Status::Cancelled
    }

    pub fn reply(&self) -> Option<Reply> {
        lock(&self.inner.state).reply.clone()
    }

    /// Waits until the response arrives or `timeout` elapses.
    ///
    /// Returns `true` only if the response arrived. A session that ends
    /// while the caller waits releases it early with `false`.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut status_rx = self.inner.status_rx.clone();
        let settled = async {
            loop {
                let status = *status_rx.borrow_and_update();
                if status != Status::Waiting {
                    return status;
                }
                if status_rx.changed().await.is_err() {
                    return Status::Cancelled;
                }
            }
        };

        trace!("Handler for {} starting wait", self.key());
        let received = matches!(
            tokio::time::timeout(timeout, settled).await,
            Ok(Status::Completed)
        );
        trace!("Handler for {} done waiting, received={}", self.key(), received);
        received
    }

    /// Stores the reply and releases waiters. A second completion is ignored.
    fn complete(&self, reply: Reply) -> bool {
        let mut state = lock(&self.inner.state);
        if *self.inner.status_rx.borrow() != Status::Waiting {
            return false;
        }
        state.reply = Some(reply);
        state.assembly = None;
        self.inner.status_tx.send_replace(Status::Completed);
        true
    }

    fn cancel(&self) {
        let _state = lock(&self.inner.state);
        if *self.inner.status_rx.borrow() == Status::Waiting {
            self.inner.status_tx.send_replace(Status::Cancelled);
        }
    }
}

/// Registry of outstanding requests for one session.
#[derive(Debug)]
pub struct ResponseRegistry {
    login: Mutex<Option<PendingResponse>>,
    commands: Mutex<HashMap<u8, PendingResponse>>,
    last_acknowledged: Mutex<Instant>,
}

impl ResponseRegistry {
    /// `acknowledged_at` seeds the send time of the last acknowledged request,
    /// which the keep-alive check compares against.
    pub fn new(acknowledged_at: Instant) -> Self {
        Self {
            login: Mutex::new(None),
            commands: Mutex::new(HashMap::new()),
            last_acknowledged: Mutex::new(acknowledged_at),
        }
    }

    /// Registers `request`, or returns the entry already registered under
    /// the same key. Requests that expect no response yield `None`.
    pub fn register_or_get(&self, request: &Request) -> Option<PendingResponse> {
        let now = Instant::now();
        match request {
            Request::Login { .. } => {
                let mut login = lock(&self.login);
                Some(
                    login
                        .get_or_insert_with(|| PendingResponse::new(ResponseKey::Login, now))
                        .clone(),
                )
            }
            Request::Command { sequence, .. } => {
                let mut commands = lock(&self.commands);
                Some(
                    commands
                        .entry(*sequence)
                        .or_insert_with(|| {
                            PendingResponse::new(ResponseKey::Command(*sequence), now)
                        })
                        .clone(),
                )
            }
            Request::Acknowledge { .. } => None,
        }
    }

    /// Returns `false` when no login is outstanding.
    pub fn complete_login(&self, success: bool) -> bool {
        let Some(pending) = lock(&self.login).take() else {
            return false;
        };
        self.register_acknowledged(pending.sent_at());
        pending.complete(Reply::Login { success })
    }

    /// Completes a single-datagram command response. Returns `false` when
    /// nothing is registered under `sequence`.
    pub fn complete_command(&self, sequence: u8, body: String) -> bool {
        let Some(pending) = lock(&self.commands).remove(&sequence) else {
            return false;
        };
        self.register_acknowledged(pending.sent_at());
        pending.complete(Reply::Command { sequence, body })
    }

    /// Adds one part of a multi-part response to its assembly.
    ///
    /// Returns `Ok(true)` when this part completed the response. An
    /// inconsistent part discards the assembly built so far and leaves the
    /// request registered.
    pub fn accept_part(&self, part: ResponsePart) -> Result<bool, AssemblyError> {
        let sequence = part.sequence;
        let mut commands = lock(&self.commands);
        let Some(pending) = commands.get(&sequence).cloned() else {
            return Ok(false);
        };
        self.register_acknowledged(pending.sent_at());

        let body = {
            let mut state = lock(&pending.inner.state);
            let outcome = match state.assembly.as_mut() {
                Some(assembly) => assembly.add_part(part),
                None => MultiPartAssembly::start(part).map(|assembly| {
                    state.assembly = Some(assembly);
                }),
            };
            if let Err(err) = outcome {
                state.assembly = None;
                return Err(err);
            }

            match state.assembly.as_ref().and_then(MultiPartAssembly::compose) {
                Some(body) => body,
                None => return Ok(false),
            }
        };

        commands.remove(&sequence);
        Ok(pending.complete(Reply::Command { sequence, body }))
    }

    /// Unregisters `pending` after its caller gave up waiting.
    ///
    /// Only removes the entry if it is still the one `pending` refers to, so a
    /// newer request that reuses the key is left alone. Other holders of the
    /// same handle are released with `false`.
    pub fn forget(&self, pending: &PendingResponse) -> bool {
        let removed = match pending.key() {
            ResponseKey::Login => {
                let mut login = lock(&self.login);
                match login.as_ref() {
                    Some(current) if Arc::ptr_eq(&current.inner, &pending.inner) => {
                        login.take().is_some()
                    }
                    _ => false,
                }
            }
            ResponseKey::Command(sequence) => {
                let mut commands = lock(&self.commands);
                match commands.get(&sequence) {
                    Some(current) if Arc::ptr_eq(&current.inner, &pending.inner) => {
                        commands.remove(&sequence).is_some()
                    }
                    _ => false,
                }
            }
        };

        if removed {
            trace!("Forgetting {}", pending.key());
            pending.cancel();
        }
        removed
    }

    /// Send time of the most recently sent request the server has answered.
    pub fn last_acknowledged_sent_at(&self) -> Instant {
        *lock(&self.last_acknowledged)
    }

    pub fn pending_commands(&self) -> usize {
        lock(&self.commands).len()
    }

    /// Drops every outstanding request and releases their waiters.
    pub fn clear(&self) {
        if let Some(login) = lock(&self.login).take() {
            login.cancel();
        }
        for (_, pending) in lock(&self.commands).drain() {
            pending.cancel();
        }
    }

    fn register_acknowledged(&self, sent_at: Instant) {
        let mut last = lock(&self.last_acknowledged);
        if sent_at > *last {
            *last = sent_at;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
