//! Fragmentation and reassembly
//!
//! Payloads larger than the per-frame limit travel as up to 255 ordered
//! fragments sharing a sender-local message id. The receiver buffers chunks
//! in any order and releases the payload once every index has arrived.
//! Partial messages older than the reassembly timeout are discarded.

use crate::protocol::packet::{FragmentInfo, NodeId, PacketType};
use crate::Millis;
use std::collections::HashMap;
use tracing::debug;

/// Most fragments a single transmission may use
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

/// Split `payload` into chunks of at most `max` bytes
///
/// An empty payload still yields one (empty) chunk.
pub fn split_payload(payload: &[u8], max: usize) -> Vec<Vec<u8>> {
    if payload.is_empty() {
        return vec![Vec::new()];
    }
    payload.chunks(max.max(1)).map(<[u8]>::to_vec).collect()
}

#[derive(Debug)]
struct Partial {
    packet_type: PacketType,
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
    started_at: Millis,
}

/// A payload rebuilt from all of its fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembled {
    pub from: NodeId,
    pub packet_type: PacketType,
    pub payload: Vec<u8>,
}

/// Receiver-side fragment buffers, keyed by sender and message id
#[derive(Debug)]
pub struct Reassembler {
    partials: HashMap<(NodeId, u16), Partial>,
    timeout_ms: u64,
    timeouts: u64,
}

impl Reassembler {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            partials: HashMap::new(),
            timeout_ms,
            timeouts: 0,
        }
    }

    /// Store one fragment; returns the payload when it completes the message
    pub fn accept(
        &mut self,
        from: NodeId,
        packet_type: PacketType,
        info: FragmentInfo,
        chunk: Vec<u8>,
        now: Millis,
    ) -> Option<Reassembled> {
        let key = (from, info.msg_id);
        let partial = self.partials.entry(key).or_insert_with(|| Partial {
            packet_type,
            chunks: vec![None; info.count as usize],
            received: 0,
            started_at: now,
        });

        if partial.chunks.len() != info.count as usize || partial.packet_type != packet_type {
            debug!(%from, msg_id = info.msg_id, "Fragment disagrees with buffered message, restarting");
            *partial = Partial {
                packet_type,
                chunks: vec![None; info.count as usize],
                received: 0,
                started_at: now,
            };
        }

        let slot = &mut partial.chunks[info.index as usize];
        if slot.is_none() {
            *slot = Some(chunk);
            partial.received += 1;
        }

        if partial.received < partial.chunks.len() {
            return None;
        }

        let partial = self.partials.remove(&key)?;
        let payload = partial.chunks.into_iter().flatten().flatten().collect();
        Some(Reassembled {
            from,
            packet_type: partial.packet_type,
            payload,
        })
    }

    /// Drop partial messages past the timeout; returns how many were dropped
    pub fn expire(&mut self, now: Millis) -> usize {
        let timeout = self.timeout_ms;
        let before = self.partials.len();
        self.partials.retain(|(from, msg_id), p| {
            let keep = now.saturating_sub(p.started_at) <= timeout;
            if !keep {
                debug!(%from, msg_id, have = p.received, of = p.chunks.len(), "Reassembly timed out");
            }
            keep
        });
        let dropped = before - self.partials.len();
        self.timeouts += dropped as u64;
        dropped
    }

    /// Messages discarded incomplete so far
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Messages currently being rebuilt
    pub fn pending(&self) -> usize {
        self.partials.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER: NodeId = NodeId::from_u32(0x51);

    fn info(index: u8, count: u8) -> FragmentInfo {
        FragmentInfo { msg_id: 4, index, count }
    }

    #[test]
    fn test_split_sizes() {
        let payload: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
        let chunks = split_payload(&payload, 256);
        assert_eq!(chunks.len(), 8);
        assert!(chunks[..7].iter().all(|c| c.len() == 256));
        assert_eq!(chunks[7].len(), 2000 - 7 * 256);
        assert_eq!(split_payload(&[], 256).len(), 1);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let payload: Vec<u8> = (0..2000u32).map(|i| (i * 7) as u8).collect();
        let chunks = split_payload(&payload, 256);
        let mut reassembler = Reassembler::new(30_000);

        for &index in &[7usize, 2, 0, 5, 1, 6, 3] {
            let out = reassembler.accept(SENDER, PacketType::TaskResult, info(index as u8, 8), chunks[index].clone(), 0);
            assert!(out.is_none());
        }
        let done = reassembler
            .accept(SENDER, PacketType::TaskResult, info(4, 8), chunks[4].clone(), 10)
            .unwrap();
        assert_eq!(done.payload, payload);
        assert_eq!(done.from, SENDER);
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_duplicate_fragment_ignored() {
        let mut reassembler = Reassembler::new(30_000);
        assert!(reassembler.accept(SENDER, PacketType::TaskResult, info(0, 2), vec![1], 0).is_none());
        assert!(reassembler.accept(SENDER, PacketType::TaskResult, info(0, 2), vec![9], 0).is_none());
        let done = reassembler.accept(SENDER, PacketType::TaskResult, info(1, 2), vec![2], 0).unwrap();
        assert_eq!(done.payload, vec![1, 2]);
    }

    #[test]
    fn test_missing_fragment_times_out() {
        let mut reassembler = Reassembler::new(30_000);
        for index in (0..8u8).filter(|i| *i != 5) {
            reassembler.accept(SENDER, PacketType::TaskResult, info(index, 8), vec![index], 1_000);
        }
        assert_eq!(reassembler.expire(31_000), 0);
        assert_eq!(reassembler.expire(31_001), 1);
        assert_eq!(reassembler.timeouts(), 1);

        // The late fragment starts a fresh buffer and cannot complete alone
        assert!(reassembler
            .accept(SENDER, PacketType::TaskResult, info(5, 8), vec![5], 31_002)
            .is_none());
    }
}
