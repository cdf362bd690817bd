//! Keepalive scheduling and liveness tracking.

use std::time::{Duration, Instant};

/// How many heartbeat intervals of silence end a session.
pub const STALL_FACTOR: u32 = 4;

/// Tracks when the next keepalive is due and when the peer was last heard.
///
/// Disarmed until the session reaches the connected state; outside of it
/// nothing is ever due and no liveness deadline applies.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    next_send: Option<Instant>,
    last_traffic: Option<Instant>,
}

/// Outcome of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Idle,
    SendDue,
    Expired { silent_for: Duration },
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: interval * STALL_FACTOR,
            next_send: None,
            last_traffic: None,
        }
    }

    /// Silence window after which the peer is considered gone.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_armed(&self) -> bool {
        self.next_send.is_some()
    }

    /// Start scheduling keepalives from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.next_send = Some(now + self.interval);
        self.last_traffic = Some(now);
    }

    pub fn disarm(&mut self) {
        self.next_send = None;
        self.last_traffic = None;
    }

    /// The peer sent something.
    pub fn record_traffic(&mut self, now: Instant) {
        if self.is_armed() {
            self.last_traffic = Some(now);
        }
    }

    /// A keepalive went out.
    pub fn record_sent(&mut self, now: Instant) {
        if self.is_armed() {
            self.next_send = Some(now + self.interval);
        }
    }

    pub fn check(&self, now: Instant) -> Liveness {
        let (Some(next_send), Some(last_traffic)) = (self.next_send, self.last_traffic) else {
            return Liveness::Idle;
        };

        let silent_for = now.saturating_duration_since(last_traffic);
        if silent_for >= self.timeout {
            Liveness::Expired { silent_for }
        } else if now >= next_send {
            Liveness::SendDue
        } else {
            Liveness::Idle
        }
    }

    /// Time from `now` until the next send or the liveness deadline,
    /// whichever comes first. `None` while disarmed.
    pub fn until_next(&self, now: Instant) -> Option<Duration> {
        let next_send = self.next_send?;
        let deadline = self.last_traffic? + self.timeout;
        Some(next_send.min(deadline).saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(5);

    #[test]
    fn test_disarmed_is_always_idle() {
        let hb = Heartbeat::new(INTERVAL);
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(hb.check(later), Liveness::Idle);
        assert_eq!(hb.until_next(later), None);
    }

    #[test]
    fn test_send_due_after_interval() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(INTERVAL);
        hb.arm(start);

        assert_eq!(hb.check(start + Duration::from_secs(4)), Liveness::Idle);
        assert_eq!(hb.check(start + INTERVAL), Liveness::SendDue);

        hb.record_sent(start + INTERVAL);
        hb.record_traffic(start + INTERVAL);
        assert_eq!(hb.check(start + Duration::from_secs(6)), Liveness::Idle);
        assert_eq!(hb.until_next(start + Duration::from_secs(6)), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_expires_after_silence() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(INTERVAL);
        hb.arm(start);

        // Sending keepalives does not keep the session alive by itself.
        for i in 1..4 {
            hb.record_sent(start + INTERVAL * i);
        }
        let at = start + hb.timeout();
        assert_eq!(hb.check(at), Liveness::Expired { silent_for: Duration::from_secs(20) });
    }

    #[test]
    fn test_traffic_pushes_deadline() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(INTERVAL);
        hb.arm(start);
        hb.record_traffic(start + Duration::from_secs(15));

        let at = start + Duration::from_secs(25);
        hb.record_sent(at);
        assert_eq!(hb.check(at), Liveness::Idle);
        assert_eq!(hb.until_next(at), Some(Duration::from_secs(5)));
    }
}
