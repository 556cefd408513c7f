//! Duplicate frame detection
//!
//! Each sender gets a sliding window anchored at the highest sequence number
//! seen from it. A bitmap records which of the preceding `window` numbers have
//! already been delivered. Sequence numbers wrap, so "ahead" and "behind" are
//! decided with wrapping arithmetic over half the sequence space.

use super::packet::NodeId;
use crate::Millis;
use std::collections::HashMap;

/// Outcome of checking a `(from, seq)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    /// First sighting; deliver it
    New,
    /// Already delivered, or too old to tell
    Duplicate,
    /// Far behind the window on a DISCOVERY: the peer restarted
    Reset,
}

impl DedupVerdict {
    pub fn is_new(&self) -> bool {
        !matches!(self, DedupVerdict::Duplicate)
    }
}

#[derive(Debug, Clone)]
struct SenderWindow {
    highest: u16,
    /// Bit `i` of the window means `highest - i` was seen
    bits: Vec<u64>,
    last_seen: Millis,
}

impl SenderWindow {
    fn new(seq: u16, words: usize, now: Millis) -> Self {
        let mut bits = vec![0u64; words];
        bits[0] = 1;
        Self {
            highest: seq,
            bits,
            last_seen: now,
        }
    }

    fn size(&self) -> u32 {
        (self.bits.len() * 64) as u32
    }

    fn get(&self, offset: u32) -> bool {
        let (word, bit) = ((offset / 64) as usize, offset % 64);
        self.bits[word] & (1 << bit) != 0
    }

    fn set(&mut self, offset: u32) {
        let (word, bit) = ((offset / 64) as usize, offset % 64);
        self.bits[word] |= 1 << bit;
    }

    /// Slide the window forward by `shift` positions
    fn advance(&mut self, shift: u32) {
        if shift >= self.size() {
            self.bits.iter_mut().for_each(|w| *w = 0);
            return;
        }
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        let len = self.bits.len();
        for i in (0..len).rev() {
            let src = i.checked_sub(word_shift);
            let mut value = src.map_or(0, |s| self.bits[s] << bit_shift);
            if bit_shift > 0 {
                if let Some(prev) = src.and_then(|s| s.checked_sub(1)) {
                    value |= self.bits[prev] >> (64 - bit_shift);
                }
            }
            self.bits[i] = value;
        }
    }
}

/// Per-sender sliding-window duplicate filter
#[derive(Debug)]
pub struct DedupWindow {
    senders: HashMap<NodeId, SenderWindow>,
    words: usize,
    max_senders: usize,
    duplicates: u64,
}

impl DedupWindow {
    /// `window` is rounded up to a multiple of 64
    pub fn new(window: u16, max_senders: usize) -> Self {
        Self {
            senders: HashMap::new(),
            words: (window as usize).div_ceil(64).max(1),
            max_senders: max_senders.max(1),
            duplicates: 0,
        }
    }

    /// Record `(from, seq)` and report whether it should be delivered
    pub fn check_and_record(&mut self, from: NodeId, seq: u16, is_discovery: bool, now: Millis) -> DedupVerdict {
        let words = self.words;
        let Some(window) = self.senders.get_mut(&from) else {
            if self.senders.len() >= self.max_senders {
                self.evict_oldest();
            }
            self.senders.insert(from, SenderWindow::new(seq, words, now));
            return DedupVerdict::New;
        };
        window.last_seen = now;

        let ahead = seq.wrapping_sub(window.highest);
        let verdict = if ahead == 0 {
            DedupVerdict::Duplicate
        } else if ahead < 0x8000 {
            window.advance(ahead as u32);
            window.highest = seq;
            window.set(0);
            DedupVerdict::New
        } else {
            let behind = window.highest.wrapping_sub(seq) as u32;
            if behind < window.size() {
                if window.get(behind) {
                    DedupVerdict::Duplicate
                } else {
                    window.set(behind);
                    DedupVerdict::New
                }
            } else if is_discovery {
                *window = SenderWindow::new(seq, words, now);
                DedupVerdict::Reset
            } else {
                DedupVerdict::Duplicate
            }
        };

        if verdict == DedupVerdict::Duplicate {
            self.duplicates += 1;
        }
        verdict
    }

    /// Forget a sender entirely
    pub fn forget(&mut self, from: NodeId) {
        self.senders.remove(&from);
    }

    /// Duplicates rejected so far
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Number of senders tracked
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .senders
            .iter()
            .min_by_key(|(_, w)| w.last_seen)
            .map(|(id, _)| *id)
        {
            self.senders.remove(&oldest);
        }
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(256, 256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: NodeId = NodeId::from_u32(0xA);
    const B: NodeId = NodeId::from_u32(0xB);

    #[test]
    fn test_first_and_repeat() {
        let mut dedup = DedupWindow::default();
        assert_eq!(dedup.check_and_record(A, 10, false, 0), DedupVerdict::New);
        assert_eq!(dedup.check_and_record(A, 10, false, 1), DedupVerdict::Duplicate);
        // Different sender, same seq
        assert_eq!(dedup.check_and_record(B, 10, false, 2), DedupVerdict::New);
        assert_eq!(dedup.duplicates(), 1);
    }

    #[test]
    fn test_out_of_order_within_window() {
        let mut dedup = DedupWindow::default();
        for seq in [5u16, 9, 7, 6, 8] {
            assert!(dedup.check_and_record(A, seq, false, 0).is_new(), "seq {seq}");
        }
        for seq in 5u16..=9 {
            assert_eq!(dedup.check_and_record(A, seq, false, 0), DedupVerdict::Duplicate);
        }
    }

    #[test]
    fn test_large_jump_crosses_words() {
        let mut dedup = DedupWindow::default();
        dedup.check_and_record(A, 100, false, 0);
        dedup.check_and_record(A, 170, false, 0);
        // 100 is now at offset 70, in the second word
        assert_eq!(dedup.check_and_record(A, 100, false, 0), DedupVerdict::Duplicate);
        assert_eq!(dedup.check_and_record(A, 101, false, 0), DedupVerdict::New);
    }

    #[test]
    fn test_wraparound() {
        let mut dedup = DedupWindow::default();
        assert!(dedup.check_and_record(A, 65_534, false, 0).is_new());
        assert!(dedup.check_and_record(A, 65_535, false, 0).is_new());
        assert!(dedup.check_and_record(A, 0, false, 0).is_new());
        assert!(dedup.check_and_record(A, 1, false, 0).is_new());
        assert_eq!(dedup.check_and_record(A, 65_535, false, 0), DedupVerdict::Duplicate);
    }

    #[test]
    fn test_older_than_window() {
        let mut dedup = DedupWindow::default();
        dedup.check_and_record(A, 1000, false, 0);
        assert_eq!(dedup.check_and_record(A, 500, false, 0), DedupVerdict::Duplicate);
        assert_eq!(dedup.check_and_record(A, 500, true, 0), DedupVerdict::Reset);
        // Window now anchored at 500
        assert_eq!(dedup.check_and_record(A, 500, false, 0), DedupVerdict::Duplicate);
        assert!(dedup.check_and_record(A, 501, false, 0).is_new());
    }

    #[test]
    fn test_sender_eviction() {
        let mut dedup = DedupWindow::new(64, 2);
        dedup.check_and_record(A, 1, false, 0);
        dedup.check_and_record(B, 1, false, 10);
        dedup.check_and_record(NodeId::from_u32(0xC), 1, false, 20);
        assert_eq!(dedup.len(), 2);
        // A was evicted, so its seq looks new again
        assert!(dedup.check_and_record(A, 1, false, 30).is_new());
    }
}
