use std::io;
use thiserror::Error;

/// Failures a caller of [`RconClient`](crate::RconClient) can observe.
///
/// Command timeouts are not errors; they come back as an unsuccessful
/// [`CommandResult`](crate::CommandResult).
#[derive(Debug, Error)]
pub enum RconError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no login response within {0:?}")]
    Timeout(std::time::Duration),

    #[error("server rejected the password")]
    InvalidCredentials,

    #[error("client is not connected")]
    NotConnected,

    #[error("client is already connected")]
    AlreadyConnected,

    #[error("session is closed; create a new client to reconnect")]
    Closed,

    #[error("receive loop failed: {0}")]
    Fatal(String),

    #[error("invalid server address: {0}")]
    InvalidAddress(String),
}

pub type RconResult<T> = Result<T, RconError>;
