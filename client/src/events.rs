//! Values the engine hands to the outside world.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Text the server pushed on its own, already acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub sequence: u8,
    pub text: String,
}

/// A datagram that was received but could not be used. The session goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionProblem {
    /// Checksum mismatch or an inconsistent multi-part response.
    Corrupted,
    /// Shorter than the smallest valid datagram.
    InvalidLength,
}

impl fmt::Display for ConnectionProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionProblem::Corrupted => write!(f, "corrupted datagram"),
            ConnectionProblem::InvalidLength => write!(f, "datagram with invalid length"),
        }
    }
}

/// Why a session ended. Set once, never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownReason {
    UserRequested,
    NoResponseFromServer,
    ServerRequested,
    FatalException,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownReason::UserRequested => "closed by user",
            ShutdownReason::NoResponseFromServer => "no response from server",
            ShutdownReason::ServerRequested => "closed by server",
            ShutdownReason::FatalException => "receive loop failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnected(ShutdownReason),
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        match self {
            SessionState::Disconnected(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Outcome of a command. A timeout gives `succeeded == false` and an empty
/// body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub succeeded: bool,
    pub body: String,
}

impl CommandResult {
    pub fn success(body: String) -> Self {
        Self {
            succeeded: true,
            body,
        }
    }

    pub fn failure() -> Self {
        Self {
            succeeded: false,
            body: String::new(),
        }
    }
}
