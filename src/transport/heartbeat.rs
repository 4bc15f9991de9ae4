//! Heartbeat pings and latency measurement

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::protocol::ClientMessage;

/// Pings older than this many intervals are forgotten
pub const PING_EXPIRY_INTERVALS: u32 = 4;

/// Tracks outstanding pings by id
///
/// Pongs are matched by id, so out-of-order delivery still yields the right
/// latency. Pongs for unknown or expired ids are ignored. A dead socket
/// surfaces through its own close or error, not through missing pongs.
#[derive(Debug)]
pub struct Heartbeat {
    pending: HashMap<String, Instant>,
    expiry: Duration,
    expired: u64,
}

impl Heartbeat {
    /// Track pings, dropping any left unanswered for `expiry`
    #[must_use]
    pub fn new(expiry: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            expiry,
            expired: 0,
        }
    }

    /// Create the next ping, remembering when it was sent
    ///
    /// Unanswered pings past the expiry are pruned first.
    pub fn ping(&mut self, now: Instant) -> ClientMessage {
        self.prune(now);

        let id = uuid::Uuid::new_v4().to_string();
        self.pending.insert(id.clone(), now);

        ClientMessage::Ping {
            id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Match a pong, returning the round-trip latency if the id was pending
    pub fn pong(&mut self, id: &str, now: Instant) -> Option<Duration> {
        let sent = self.pending.remove(id)?;
        Some(now.saturating_duration_since(sent))
    }

    /// Pings still waiting for a pong
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Pings dropped without a pong since creation
    #[must_use]
    pub const fn expired(&self) -> u64 {
        self.expired
    }

    fn prune(&mut self, now: Instant) {
        let expiry = self.expiry;
        let before = self.pending.len();
        self.pending
            .retain(|_, sent| now.saturating_duration_since(*sent) < expiry);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            self.expired += u64::try_from(dropped).unwrap_or(u64::MAX);
            tracing::debug!(dropped, "unanswered pings expired");
        }
    }

    /// Forget all outstanding pings
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
