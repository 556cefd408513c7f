//! Bandwidth limiting
//!
//! A token bucket refills at `max_bytes_per_second`. Its depth is one
//! maximum-size frame, so over any one-second window NORMAL and lower
//! traffic stays within the rate plus a single frame. HIGH traffic draws
//! on a second allowance refilling at twice the rate; everything gated
//! also debits that allowance, so the total stays within 2x. CRITICAL
//! never touches either.

use super::transmission::Priority;
use crate::Millis;
use tracing::info;

/// Token bucket gating non-critical frames
#[derive(Debug, Clone)]
pub struct TokenBucket {
    rate: u32,
    capacity: f64,
    tokens: f64,
    /// HIGH allowance, refilled at `2 * rate` up to `2 * capacity`
    burst_tokens: f64,
    last_refill: Millis,
}

impl TokenBucket {
    /// Multiplier applied to the rate for HIGH priority
    pub const HIGH_BURST: f64 = 2.0;

    /// `capacity` is the bucket depth in bytes
    pub fn new(rate: u32, capacity: usize) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            rate,
            capacity,
            tokens: capacity,
            burst_tokens: capacity * Self::HIGH_BURST,
            last_refill: 0,
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Sustained rate available to `priority`, `None` when unlimited
    pub fn rate_for(&self, priority: Priority) -> Option<u64> {
        match priority {
            Priority::Critical => None,
            Priority::High => Some((self.rate as f64 * Self::HIGH_BURST) as u64),
            Priority::Normal | Priority::Low | Priority::Background => Some(self.rate as u64),
        }
    }

    pub fn set_rate(&mut self, rate: u32, now: Millis) {
        self.refill(now);
        self.rate = rate;
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Millis) {
        let elapsed = now.saturating_sub(self.last_refill);
        if elapsed > 0 {
            let earned = self.rate as f64 * elapsed as f64 / 1000.0;
            self.tokens = (self.tokens + earned).min(self.capacity);
            self.burst_tokens =
                (self.burst_tokens + earned * Self::HIGH_BURST).min(self.capacity * Self::HIGH_BURST);
            self.last_refill = now;
        }
    }

    /// Take `bytes` tokens if `priority` allows it right now
    pub fn try_consume(&mut self, bytes: usize, priority: Priority, now: Millis) -> bool {
        if priority == Priority::Critical {
            return true;
        }
        self.refill(now);

        let bytes = bytes as f64;
        // Frames larger than the bucket go out once it is full
        match priority {
            Priority::Critical => true,
            Priority::High => {
                if self.burst_tokens < bytes.min(self.capacity * Self::HIGH_BURST) {
                    return false;
                }
                self.burst_tokens -= bytes;
                // HIGH holds lower priorities back, bounded to one depth of debt
                self.tokens = (self.tokens - bytes).max(-self.capacity);
                true
            }
            Priority::Normal | Priority::Low | Priority::Background => {
                if self.tokens < bytes.min(self.capacity) {
                    return false;
                }
                self.tokens -= bytes;
                self.burst_tokens -= bytes;
                true
            }
        }
    }

    /// Return tokens for a frame the radio refused
    pub fn refund(&mut self, bytes: usize, priority: Priority) {
        if priority != Priority::Critical {
            let bytes = bytes as f64;
            self.tokens = (self.tokens + bytes).min(self.capacity);
            self.burst_tokens = (self.burst_tokens + bytes).min(self.capacity * Self::HIGH_BURST);
        }
    }
}

/// Loss-driven rate adjustment (additive increase, multiplicative decrease)
#[derive(Debug, Clone)]
pub struct RateController {
    current: u32,
    floor: u32,
    ceiling: u32,
    eval_interval_ms: u64,
    last_eval: Millis,
    delivered: u32,
    lost: u32,
}

impl RateController {
    /// Loss above this halves the rate
    pub const DECREASE_THRESHOLD: f32 = 0.10;
    /// Loss below this raises the rate
    pub const INCREASE_THRESHOLD: f32 = 0.02;
    /// Samples needed before a decision
    pub const MIN_SAMPLES: u32 = 5;

    pub fn new(initial: u32, floor: u32, ceiling: u32, eval_interval_ms: u64) -> Self {
        Self {
            current: initial.clamp(floor, ceiling),
            floor,
            ceiling,
            eval_interval_ms,
            last_eval: 0,
            delivered: 0,
            lost: 0,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn record_delivered(&mut self) {
        self.delivered = self.delivered.saturating_add(1);
    }

    pub fn record_lost(&mut self) {
        self.lost = self.lost.saturating_add(1);
    }

    /// Re-evaluate once per interval; returns the new rate when it changed
    pub fn evaluate(&mut self, now: Millis) -> Option<u32> {
        if now.saturating_sub(self.last_eval) < self.eval_interval_ms {
            return None;
        }
        let samples = self.delivered + self.lost;
        if samples < Self::MIN_SAMPLES {
            return None;
        }

        let loss = self.lost as f32 / samples as f32;
        self.last_eval = now;
        self.delivered = 0;
        self.lost = 0;

        let previous = self.current;
        if loss > Self::DECREASE_THRESHOLD {
            self.current = (self.current / 2).max(self.floor);
        } else if loss < Self::INCREASE_THRESHOLD {
            self.current = self
                .current
                .saturating_add((self.ceiling / 10).max(1))
                .min(self.ceiling);
        }

        if self.current != previous {
            info!(loss = %format!("{:.1}%", loss * 100.0), from = previous, to = self.current, "Bandwidth adjusted");
            Some(self.current)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_gates_normal() {
        let mut bucket = TokenBucket::new(1000, 300);
        assert!(bucket.try_consume(300, Priority::Normal, 0));
        assert!(!bucket.try_consume(100, Priority::Normal, 0));
        // 100 ms refills 100 bytes
        assert!(bucket.try_consume(100, Priority::Normal, 100));
        assert!(!bucket.try_consume(1, Priority::Low, 100));
    }

    #[test]
    fn test_critical_bypasses() {
        let mut bucket = TokenBucket::new(10, 100);
        for _ in 0..50 {
            assert!(bucket.try_consume(100, Priority::Critical, 0));
        }
        assert_eq!(bucket.tokens(), 100.0);
    }

    #[test]
    fn test_high_holds_back_normal() {
        let mut bucket = TokenBucket::new(1000, 300);
        assert!(bucket.try_consume(300, Priority::High, 0));
        assert!(bucket.try_consume(300, Priority::High, 0));
        assert!(!bucket.try_consume(1, Priority::High, 0));
        // Debt must be repaid before normal traffic flows
        assert!(!bucket.try_consume(100, Priority::Normal, 300));
        assert!(bucket.try_consume(100, Priority::Normal, 400));
    }

    #[test]
    fn test_high_sustains_twice_rate() {
        let frame = 273;
        let rate = 512;
        let mut bucket = TokenBucket::new(rate, frame);
        let mut sent: Vec<(Millis, usize)> = Vec::new();
        for now in (0..10_000).step_by(5) {
            while bucket.try_consume(frame, Priority::High, now) {
                sent.push((now, frame));
            }
        }
        let total: usize = sent.iter().map(|(_, b)| b).sum();
        assert!(total >= 2 * rate as usize * 9, "high sent {total}");
        for start in (0..9_000).step_by(50) {
            let bytes: usize = sent
                .iter()
                .filter(|(t, _)| *t >= start && *t < start + 1000)
                .map(|(_, b)| b)
                .sum();
            assert!(bytes <= 2 * (rate as usize + frame), "window at {start}: {bytes}");
        }
    }

    #[test]
    fn test_normal_stays_at_rate_beside_high() {
        let frame = 273;
        let rate = 2048;
        let mut bucket = TokenBucket::new(rate, frame);
        let mut normal: Vec<(Millis, usize)> = Vec::new();
        let mut total = 0;
        for now in (0..10_000).step_by(5) {
            if now % 200 == 0 && bucket.try_consume(frame, Priority::High, now) {
                total += frame;
            }
            while bucket.try_consume(frame, Priority::Normal, now) {
                normal.push((now, frame));
                total += frame;
            }
        }
        for start in (0..9_000).step_by(50) {
            let bytes: usize = normal
                .iter()
                .filter(|(t, _)| *t >= start && *t < start + 1000)
                .map(|(_, b)| b)
                .sum();
            assert!(bytes <= rate as usize + frame, "window at {start}: {bytes}");
        }
        assert!(total <= 2 * (rate as usize * 10 + frame));
    }

    #[test]
    fn test_rate_for_priority() {
        let bucket = TokenBucket::new(512, 273);
        assert_eq!(bucket.rate_for(Priority::Critical), None);
        assert_eq!(bucket.rate_for(Priority::High), Some(1024));
        assert_eq!(bucket.rate_for(Priority::Background), Some(512));
    }

    #[test]
    fn test_refund() {
        let mut bucket = TokenBucket::new(1000, 300);
        assert!(bucket.try_consume(300, Priority::Normal, 0));
        bucket.refund(300, Priority::Normal);
        assert!(bucket.try_consume(300, Priority::Normal, 0));
    }

    #[test]
    fn test_one_second_window_conformance() {
        let frame = 273;
        let rate = 2048;
        let mut bucket = TokenBucket::new(rate, frame);
        let mut sent: Vec<(Millis, usize)> = Vec::new();
        for now in (0..10_000).step_by(5) {
            while bucket.try_consume(frame, Priority::Normal, now) {
                sent.push((now, frame));
            }
        }
        for start in (0..9_000).step_by(50) {
            let bytes: usize = sent
                .iter()
                .filter(|(t, _)| *t >= start && *t < start + 1000)
                .map(|(_, b)| b)
                .sum();
            assert!(bytes <= rate as usize + frame, "window at {start}: {bytes}");
        }
    }

    #[test]
    fn test_rate_controller_halves_on_loss() {
        let mut ctl = RateController::new(2048, 64, 4096, 5000);
        for _ in 0..8 {
            ctl.record_delivered();
        }
        for _ in 0..2 {
            ctl.record_lost();
        }
        assert_eq!(ctl.evaluate(4999), None);
        assert_eq!(ctl.evaluate(5000), Some(1024));
    }

    #[test]
    fn test_rate_controller_floor_and_increase() {
        let mut ctl = RateController::new(100, 64, 1000, 1000);
        for _ in 0..5 {
            ctl.record_lost();
        }
        assert_eq!(ctl.evaluate(1000), Some(64));

        for _ in 0..50 {
            ctl.record_delivered();
        }
        assert_eq!(ctl.evaluate(2000), Some(164));
    }

    #[test]
    fn test_rate_controller_needs_samples() {
        let mut ctl = RateController::new(1000, 64, 2000, 1000);
        ctl.record_lost();
        assert_eq!(ctl.evaluate(10_000), None);
    }
}
