use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Counters updated by the engine's send path and receive loop.
#[derive(Debug, Default)]
pub struct RconMetrics {
    inbound_datagrams: AtomicU64,
    outbound_datagrams: AtomicU64,
    parsed_datagrams: AtomicU64,
    dispatched_console_messages: AtomicU64,
    keep_alives_sent: AtomicU64,
    keep_alives_acknowledged: AtomicU64,
    window: Mutex<RunWindow>,
}

#[derive(Debug, Default, Clone, Copy)]
struct RunWindow {
    started: Option<Instant>,
    stopped: Option<Instant>,
}

/// Point-in-time copy of [`RconMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub inbound_datagrams: u64,
    pub outbound_datagrams: u64,
    pub parsed_datagrams: u64,
    pub dispatched_console_messages: u64,
    pub keep_alives_sent: u64,
    pub keep_alives_acknowledged: u64,
    pub running: bool,
    pub runtime_ms: u64,
}

impl RconMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_inbound(&self) {
        self.inbound_datagrams.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outbound(&self) {
        self.outbound_datagrams.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parsed(&self) {
        self.parsed_datagrams.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_console_message(&self) {
        self.dispatched_console_messages
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keep_alive_sent(&self) {
        self.keep_alives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keep_alive_acknowledged(&self) {
        self.keep_alives_acknowledged
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn start(&self, at: Instant) {
        let mut window = self.window();
        window.started = Some(at);
        window.stopped = None;
    }

    pub fn stop(&self, at: Instant) {
        let mut window = self.window();
        if window.started.is_some() && window.stopped.is_none() {
            window.stopped = Some(at);
        }
    }

    /// Time between start and stop, or start and now while running.
    pub fn runtime(&self) -> Duration {
        let window = *self.window();
        match window.started {
            Some(started) => window
                .stopped
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(started),
            None => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let window = *self.window();
        MetricsSnapshot {
            inbound_datagrams: self.inbound_datagrams.load(Ordering::Relaxed),
            outbound_datagrams: self.outbound_datagrams.load(Ordering::Relaxed),
            parsed_datagrams: self.parsed_datagrams.load(Ordering::Relaxed),
            dispatched_console_messages: self
                .dispatched_console_messages
                .load(Ordering::Relaxed),
            keep_alives_sent: self.keep_alives_sent.load(Ordering::Relaxed),
            keep_alives_acknowledged: self.keep_alives_acknowledged.load(Ordering::Relaxed),
            running: window.started.is_some() && window.stopped.is_none(),
            runtime_ms: self.runtime().as_millis() as u64,
        }
    }

    fn window(&self) -> std::sync::MutexGuard<'_, RunWindow> {
        self.window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
