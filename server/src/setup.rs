use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Behaviour switches of the mock server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSetup {
    pub password: String,
    /// Answer logins and nothing else.
    pub only_login: bool,
    /// Never answer a login, as if the server were unreachable.
    pub login_server_down: bool,
    /// Send the parts of multi-part responses in random order.
    pub disordered_multi_part: bool,
    /// Console messages sent after a successful login, `-1` for no limit.
    /// The shutdown signal follows the last one.
    pub console_messages: i32,
    /// Send every console message twice under the same sequence number.
    pub repeated_console_messages: bool,
    /// Damage the checksum of every console message.
    pub corrupt_console_messages: bool,
    pub dont_answer_keep_alive: bool,
    /// Pause between two console messages.
    pub message_interval: Duration,
    /// Stop after this long, sending the shutdown signal if a client logged in.
    pub max_run: Option<Duration>,
}

impl Default for ServerSetup {
    fn default() -> Self {
        Self {
            password: "password".to_string(),
            only_login: false,
            login_server_down: false,
            disordered_multi_part: false,
            console_messages: 0,
            repeated_console_messages: false,
            corrupt_console_messages: false,
            dont_answer_keep_alive: false,
            message_interval: Duration::from_millis(1),
            max_run: None,
        }
    }
}

impl ServerSetup {
    pub fn has_console_load(&self) -> bool {
        !self.only_login && self.console_messages != 0
    }
}

/// What the mock server saw and did during its run.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    logins_received: AtomicU64,
    commands_received: AtomicU64,
    keep_alives_received: AtomicU64,
    acks_received: AtomicU64,
    corrupted_received: AtomicU64,
    console_messages_generated: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetricsSnapshot {
    pub logins_received: u64,
    pub commands_received: u64,
    pub keep_alives_received: u64,
    pub acks_received: u64,
    pub corrupted_received: u64,
    pub console_messages_generated: u64,
}

impl ServerMetrics {
    pub fn record_login(&self) {
        self.logins_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keep_alive(&self) {
        self.keep_alives_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupted(&self) {
        self.corrupted_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_console_message(&self) {
        self.console_messages_generated
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerMetricsSnapshot {
        ServerMetricsSnapshot {
            logins_received: self.logins_received.load(Ordering::Relaxed),
            commands_received: self.commands_received.load(Ordering::Relaxed),
            keep_alives_received: self.keep_alives_received.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            corrupted_received: self.corrupted_received.load(Ordering::Relaxed),
            console_messages_generated: self
                .console_messages_generated
                .load(Ordering::Relaxed),
        }
    }
}
