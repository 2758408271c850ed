use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection parameters and protocol timings for one client.
///
/// Durations are (de)serialized as whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the RCon server.
    pub server: String,
    pub password: String,

    #[serde(with = "millis")]
    pub login_timeout: Duration,
    #[serde(with = "millis")]
    pub command_timeout: Duration,

    /// Idle time after which the server is probed with empty commands.
    #[serde(with = "millis")]
    pub keep_alive_period: Duration,
    /// How long after start the first keep-alive check is deferred.
    #[serde(with = "millis")]
    pub keep_alive_grace: Duration,
    /// Spacing between two keep-alives of the same round.
    #[serde(with = "millis")]
    pub keep_alive_interval: Duration,
    pub keep_alive_max_tries: u32,

    /// Longest the receive loop waits on the socket before checking timers.
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// Acknowledge console messages but never emit them.
    pub discard_console_messages: bool,
    pub receive_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", shared::DEFAULT_RCON_PORT),
            password: String::new(),
            login_timeout: Duration::from_secs(3),
            command_timeout: Duration::from_secs(3),
            keep_alive_period: Duration::from_secs(25),
            keep_alive_grace: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(1),
            keep_alive_max_tries: 5,
            poll_interval: Duration::from_millis(500),
            discard_console_messages: false,
            receive_buffer_size: shared::MAX_DATAGRAM_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(server: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// The poll interval, capped so timers are checked at least once a second.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval
            .min(Duration::from_secs(1))
            .max(Duration::from_millis(1))
    }
}

mod millis {
    use serde::{ser, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).map_err(|_| {
            ser::Error::custom(format!("duration of {:?} does not fit in u64 milliseconds", value))
        })?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
