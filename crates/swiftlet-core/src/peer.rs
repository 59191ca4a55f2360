//! Per-peer plumbing: channel ids and liveness tracking.

use std::time::{Duration, Instant};

use rand::Rng;

/// Generate a non-zero channel id. Zero is reserved: it marks the
/// destination of an opening handshake and the source of a closing one.
#[must_use]
pub fn generate_channel_id() -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let id: u32 = rng.gen();
        if id != 0 {
            return id;
        }
    }
}

/// Tracks when a peer conversation last moved and whether it has gone
/// silent too long. Both state machines wait for the next inbound
/// datagram through [`Liveness::remaining`]; a wait that outlives it is
/// the session timeout.
#[derive(Debug)]
pub struct Liveness {
    last_recv: Instant,
    last_send: Instant,
    timeout: Duration,
}

impl Liveness {
    /// Start the clocks now.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_recv: now,
            last_send: now,
            timeout,
        }
    }

    /// Record inbound traffic.
    pub fn touch_recv(&mut self) {
        self.last_recv = Instant::now();
    }

    /// Record outbound traffic.
    pub fn touch_send(&mut self) {
        self.last_send = Instant::now();
    }

    fn idle(&self) -> Duration {
        self.last_recv.max(self.last_send).elapsed()
    }

    /// True once the conversation has been silent for the timeout span.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.idle() > self.timeout
    }

    /// Time left to wait for the next inbound datagram; zero once
    /// expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.idle())
    }

    /// The configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Monotonic nanosecond timestamp for DATA messages. The receiver echoes
/// it back in ACK's delay sample and interprets it no further.
#[must_use]
pub fn monotonic_nanos() -> u64 {
    use std::sync::OnceLock;
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_nonzero() {
        for _ in 0..64 {
            assert_ne!(generate_channel_id(), 0);
        }
    }

    #[test]
    fn test_liveness_expiry_and_touch() {
        let mut live = Liveness::new(Duration::from_millis(20));
        assert!(!live.expired());

        std::thread::sleep(Duration::from_millis(30));
        assert!(live.expired());
        assert_eq!(live.remaining(), Duration::ZERO);

        // Any traffic reopens the window.
        live.touch_recv();
        assert!(!live.expired());
        assert!(live.remaining() <= live.timeout());

        std::thread::sleep(Duration::from_millis(30));
        live.touch_send();
        assert!(!live.expired());
    }

    #[test]
    fn test_monotonic_nanos_advances() {
        let a = monotonic_nanos();
        std::thread::sleep(Duration::from_millis(1));
        let b = monotonic_nanos();
        assert!(b > a);
    }
}
