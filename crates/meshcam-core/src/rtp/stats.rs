//! Transport statistics

use crate::Millis;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Snapshot returned by `statistics()`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthStats {
    /// Frames handed to the radio
    pub packets_tx: u64,
    /// Frames received and parsed
    pub packets_rx: u64,
    pub bytes_tx: u64,
    pub bytes_rx: u64,
    pub retransmissions: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    /// Frames dropped as already delivered
    pub duplicates_dropped: u64,
    /// Frames dropped as unparseable
    pub malformed_dropped: u64,
    /// `transmit_data` calls refused with a full queue
    pub queue_drops: u64,
    pub radio_rejections: u64,
    /// Partial messages discarded at the receiver
    pub reassembly_timeouts: u64,
    /// Frames forwarded for other nodes
    pub relayed: u64,
    pub transmissions_acked: u64,
    pub transmissions_failed: u64,
    pub transmissions_expired: u64,
    /// Unacknowledged share of recent ack-requiring sends (0.0 - 1.0)
    pub loss_rate: f32,
    /// Smoothed round-trip time
    pub latency_ema_ms: Option<f32>,
    /// Bytes per second sent over the rolling window
    pub throughput_bps: f32,
    /// Current token bucket rate
    pub rate_limit_bps: u32,
    /// Live transmissions
    pub queue_depth: usize,
}

/// Running counters behind [`BandwidthStats`]
#[derive(Debug)]
pub(crate) struct StatsTracker {
    pub stats: BandwidthStats,
    /// Outcome of recent ack-requiring sends, true when delivered
    outcomes: VecDeque<bool>,
    /// (time, bytes) of recent sends
    sent: VecDeque<(Millis, usize)>,
}

impl StatsTracker {
    const OUTCOME_WINDOW: usize = 100;
    const THROUGHPUT_WINDOW_MS: u64 = 10_000;
    const RTT_ALPHA: f32 = 0.2;

    pub fn new() -> Self {
        Self {
            stats: BandwidthStats::default(),
            outcomes: VecDeque::with_capacity(Self::OUTCOME_WINDOW),
            sent: VecDeque::new(),
        }
    }

    pub fn record_tx(&mut self, bytes: usize, now: Millis) {
        self.stats.packets_tx += 1;
        self.stats.bytes_tx += bytes as u64;
        self.sent.push_back((now, bytes));
        self.prune(now);
    }

    pub fn record_rx(&mut self, bytes: usize) {
        self.stats.packets_rx += 1;
        self.stats.bytes_rx += bytes as u64;
    }

    pub fn record_outcome(&mut self, delivered: bool) {
        if self.outcomes.len() == Self::OUTCOME_WINDOW {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(delivered);
        let lost = self.outcomes.iter().filter(|d| !**d).count();
        self.stats.loss_rate = lost as f32 / self.outcomes.len() as f32;
    }

    pub fn record_rtt(&mut self, rtt_ms: u64) {
        let sample = rtt_ms as f32;
        self.stats.latency_ema_ms = Some(match self.stats.latency_ema_ms {
            Some(ema) => Self::RTT_ALPHA * sample + (1.0 - Self::RTT_ALPHA) * ema,
            None => sample,
        });
    }

    fn prune(&mut self, now: Millis) {
        let cutoff = now.saturating_sub(Self::THROUGHPUT_WINDOW_MS);
        while let Some((time, _)) = self.sent.front() {
            if *time < cutoff {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&mut self, now: Millis, rate: u32, queue_depth: usize) -> BandwidthStats {
        self.prune(now);
        let bytes: usize = self.sent.iter().map(|(_, b)| *b).sum();
        let window_secs = (Self::THROUGHPUT_WINDOW_MS as f32 / 1000.0).min(now.max(1) as f32 / 1000.0);
        self.stats.throughput_bps = bytes as f32 / window_secs;
        self.stats.rate_limit_bps = rate;
        self.stats.queue_depth = queue_depth;
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_rate_window() {
        let mut tracker = StatsTracker::new();
        for _ in 0..3 {
            tracker.record_outcome(true);
        }
        tracker.record_outcome(false);
        assert!((tracker.stats.loss_rate - 0.25).abs() < f32::EPSILON);

        for _ in 0..StatsTracker::OUTCOME_WINDOW {
            tracker.record_outcome(true);
        }
        assert_eq!(tracker.stats.loss_rate, 0.0);
    }

    #[test]
    fn test_rtt_ema() {
        let mut tracker = StatsTracker::new();
        tracker.record_rtt(100);
        assert_eq!(tracker.stats.latency_ema_ms, Some(100.0));
        tracker.record_rtt(200);
        assert!((tracker.stats.latency_ema_ms.unwrap() - 120.0).abs() < 1e-3);
    }

    #[test]
    fn test_throughput_rolls_off() {
        let mut tracker = StatsTracker::new();
        tracker.record_tx(1000, 20_000);
        tracker.record_tx(1000, 25_000);
        let snap = tracker.snapshot(29_000, 2048, 0);
        assert!((snap.throughput_bps - 200.0).abs() < 1e-3);

        let snap = tracker.snapshot(34_000, 2048, 0);
        assert!((snap.throughput_bps - 100.0).abs() < 1e-3);
        assert_eq!(snap.packets_tx, 2);
    }
}
