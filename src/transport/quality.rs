//! Connection quality grading

use std::time::Duration;

use serde::Serialize;

/// Coarse connection quality derived from latency and packet loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    #[default]
    Poor,
    Fair,
    Good,
    Excellent,
}

impl ConnectionQuality {
    /// Grade a latency sample and loss rate (0.0-1.0)
    #[must_use]
    pub fn grade(latency: Duration, loss_rate: f64) -> Self {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let loss_pct = loss_rate * 100.0;

        if latency_ms < 50.0 && loss_pct < 1.0 {
            Self::Excellent
        } else if latency_ms < 100.0 && loss_pct < 5.0 {
            Self::Good
        } else if latency_ms < 200.0 && loss_pct < 10.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        }
    }
}

/// Packet and latency counters for the current connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub packets_lost: u64,
    pub total_packets: u64,
    pub average_latency_ms: f64,
    #[serde(skip)]
    latency_samples: u64,
}

impl QualityMetrics {
    /// Fraction of packets lost
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn loss_rate(&self) -> f64 {
        if self.total_packets == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.total_packets as f64
        }
    }

    /// Fold a latency sample into the running average
    #[allow(clippy::cast_precision_loss)]
    pub fn record_latency(&mut self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        self.latency_samples += 1;
        self.average_latency_ms += (ms - self.average_latency_ms) / self.latency_samples as f64;
    }

    /// Count a packet handed to the socket
    pub const fn record_sent(&mut self) {
        self.total_packets += 1;
    }

    /// Count a packet that could not be delivered
    pub const fn record_lost(&mut self) {
        self.total_packets += 1;
        self.packets_lost += 1;
    }
}
