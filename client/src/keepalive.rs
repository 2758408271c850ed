use crate::pending::PendingResponse;
use std::time::{Duration, Instant};

/// What the engine should do after polling the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    /// Send another empty command with [`KeepAliveMonitor::sequence`].
    Send,
    /// Nothing to do until the next poll.
    Wait,
    /// One of the keep-alives was answered; the monitor can be dropped.
    Acknowledged,
    /// Every try went unanswered. The server is considered gone.
    Expired,
}

/// Whether a stale session should start probing the server.
///
/// `last_acknowledged` is the send time of the newest request the server
/// answered, not the time the answer arrived.
pub fn keep_alive_needed(
    now: Instant,
    last_command_sent: Instant,
    last_acknowledged: Instant,
    period: Duration,
) -> bool {
    now.saturating_duration_since(last_command_sent) > period
        && now.saturating_duration_since(last_acknowledged) > period
}

/// Timing and counting for one round of keep-alive pings.
///
/// The monitor does no I/O. Every ping of a round reuses the same command
/// sequence number, so the server's answer to any of them completes it.
#[derive(Debug)]
pub struct KeepAliveMonitor {
    sequence: u8,
    interval: Duration,
    max_tries: u32,
    sent: Vec<PendingResponse>,
    last_sent_at: Option<Instant>,
}

impl KeepAliveMonitor {
    pub fn new(sequence: u8, interval: Duration, max_tries: u32) -> Self {
        Self {
            sequence,
            interval,
            max_tries,
            sent: Vec::new(),
            last_sent_at: None,
        }
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn tries(&self) -> u32 {
        self.sent.len() as u32
    }

    pub fn poll(&mut self, now: Instant) -> KeepAliveAction {
        if self.sent.iter().any(PendingResponse::is_completed) {
            return KeepAliveAction::Acknowledged;
        }

        if let Some(last) = self.last_sent_at {
            if now.saturating_duration_since(last) < self.interval {
                return KeepAliveAction::Wait;
            }
        }

        if self.tries() >= self.max_tries {
            KeepAliveAction::Expired
        } else {
            KeepAliveAction::Send
        }
    }

    pub fn record_sent(&mut self, pending: PendingResponse, at: Instant) {
        self.sent.push(pending);
        self.last_sent_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::ResponseRegistry;
    use shared::Request;

    const INTERVAL: Duration = Duration::from_secs(1);

    fn ping(registry: &ResponseRegistry, sequence: u8) -> PendingResponse {
        registry
            .register_or_get(&Request::Command {
                sequence,
                command: String::new(),
            })
            .unwrap()
    }

    #[test]
    fn test_keep_alive_needed_requires_both_stale() {
        let now = Instant::now() + Duration::from_secs(100);
        let period = Duration::from_secs(25);
        let stale = now - Duration::from_secs(30);
        let fresh = now - Duration::from_secs(5);

        assert!(keep_alive_needed(now, stale, stale, period));
        assert!(!keep_alive_needed(now, fresh, stale, period));
        assert!(!keep_alive_needed(now, stale, fresh, period));
        assert!(!keep_alive_needed(now, fresh, fresh, period));
    }

    #[test]
    fn test_keep_alive_not_needed_for_future_timestamps() {
        let now = Instant::now();
        let later = now + Duration::from_secs(10);
        assert!(!keep_alive_needed(now, later, later, Duration::from_secs(1)));
    }

    #[test]
    fn test_first_poll_sends() {
        let mut monitor = KeepAliveMonitor::new(12, INTERVAL, 5);
        assert_eq!(monitor.poll(Instant::now()), KeepAliveAction::Send);
        assert_eq!(monitor.tries(), 0);
        assert_eq!(monitor.sequence(), 12);
    }

    #[test]
    fn test_waits_between_tries() {
        let registry = ResponseRegistry::new(Instant::now());
        let start = Instant::now();
        let mut monitor = KeepAliveMonitor::new(0, INTERVAL, 5);

        monitor.record_sent(ping(&registry, 0), start);
        assert_eq!(
            monitor.poll(start + Duration::from_millis(500)),
            KeepAliveAction::Wait
        );
        assert_eq!(monitor.poll(start + INTERVAL), KeepAliveAction::Send);
    }

    #[test]
    fn test_expires_after_max_tries() {
        let registry = ResponseRegistry::new(Instant::now());
        let start = Instant::now();
        let mut monitor = KeepAliveMonitor::new(3, INTERVAL, 5);

        let mut now = start;
        for _ in 0..5 {
            assert_eq!(monitor.poll(now), KeepAliveAction::Send);
            monitor.record_sent(ping(&registry, 3), now);
            now += INTERVAL;
        }
        assert_eq!(monitor.tries(), 5);
        assert_eq!(
            monitor.poll(now - Duration::from_millis(1)),
            KeepAliveAction::Wait
        );
        assert_eq!(monitor.poll(now), KeepAliveAction::Expired);
    }

    #[test]
    fn test_any_answer_acknowledges() {
        let registry = ResponseRegistry::new(Instant::now());
        let start = Instant::now();
        let mut monitor = KeepAliveMonitor::new(8, INTERVAL, 5);

        monitor.record_sent(ping(&registry, 8), start);
        monitor.record_sent(ping(&registry, 8), start + INTERVAL);
        assert!(registry.complete_command(8, String::new()));

        assert_eq!(
            monitor.poll(start + INTERVAL + Duration::from_millis(10)),
            KeepAliveAction::Acknowledged
        );
    }

    #[test]
    fn test_late_answer_beats_expiry() {
        let registry = ResponseRegistry::new(Instant::now());
        let start = Instant::now();
        let mut monitor = KeepAliveMonitor::new(1, INTERVAL, 1);

        monitor.record_sent(ping(&registry, 1), start);
        registry.complete_command(1, String::new());
        assert_eq!(
            monitor.poll(start + INTERVAL * 3),
            KeepAliveAction::Acknowledged
        );
    }
}
