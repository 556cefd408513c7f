//! Flood relay
//!
//! RELAY nodes extend the mesh beyond single-hop range by rebroadcasting
//! frames that are not addressed to them:
//!
//! - each `(from, seq)` is forwarded at most once while it sits in the
//!   forward cache
//! - the hops-travelled field is incremented on every forward
//! - frames that already travelled `max_hops` are dropped
//!
//! Receivers derive the sender's hop count as hops-travelled + 1.

use crate::config::RelayConfig;
use crate::protocol::packet::{NodeId, PacketHeader};
use crate::Millis;
use std::collections::HashMap;
use tracing::trace;

/// Recently forwarded frames, keyed by `(from, seq)`
#[derive(Debug)]
pub struct ForwardCache {
    seen: HashMap<(NodeId, u16), Millis>,
    ttl_ms: u64,
    max_size: usize,
    last_cleanup: Millis,
}

impl ForwardCache {
    const CLEANUP_INTERVAL_MS: u64 = 30_000;

    pub fn new(ttl_ms: u64, max_size: usize) -> Self {
        Self {
            seen: HashMap::new(),
            ttl_ms,
            max_size: max_size.max(1),
            last_cleanup: 0,
        }
    }

    /// Record the key; returns true the first time it is seen within the TTL
    pub fn check_and_add(&mut self, from: NodeId, seq: u16, now: Millis) -> bool {
        if now.saturating_sub(self.last_cleanup) > Self::CLEANUP_INTERVAL_MS {
            self.cleanup(now);
        }

        let key = (from, seq);
        if let Some(&at) = self.seen.get(&key) {
            if now.saturating_sub(at) < self.ttl_ms {
                return false;
            }
        }

        if self.seen.len() >= self.max_size {
            self.cleanup(now);
            if self.seen.len() >= self.max_size {
                self.evict_oldest();
            }
        }
        self.seen.insert(key, now);
        true
    }

    /// Remove expired entries
    pub fn cleanup(&mut self, now: Millis) {
        let ttl = self.ttl_ms;
        self.seen.retain(|_, at| now.saturating_sub(*at) < ttl);
        self.last_cleanup = now;
    }

    fn evict_oldest(&mut self) {
        if let Some(key) = self.seen.iter().min_by_key(|(_, at)| **at).map(|(k, _)| *k) {
            self.seen.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Decides which received frames a relay rebroadcasts
#[derive(Debug)]
pub struct FloodRelay {
    node_id: NodeId,
    max_hops: u8,
    cache: ForwardCache,
}

impl FloodRelay {
    pub fn new(node_id: NodeId, config: &RelayConfig) -> Self {
        Self {
            node_id,
            max_hops: config.max_hops,
            cache: ForwardCache::new(config.forward_cache_ttl_ms, config.forward_cache_size),
        }
    }

    /// Frame bytes to rebroadcast, with the hop field incremented
    ///
    /// Unparseable frames, our own frames, frames for us and frames that
    /// have travelled far enough are not forwarded.
    pub fn consider(&mut self, bytes: &[u8], now: Millis) -> Option<Vec<u8>> {
        let mut header = PacketHeader::from_bytes(bytes).ok()?;
        if header.from == self.node_id || header.to == self.node_id {
            return None;
        }
        let hops = header.flags.hops();
        if hops >= self.max_hops {
            trace!(from = %header.from, seq = header.seq, hops, "Hop limit reached");
            return None;
        }
        if !self.cache.check_and_add(header.from, header.seq, now) {
            return None;
        }

        header.flags.set_hops(hops + 1);
        let mut out = Vec::with_capacity(bytes.len());
        header.write_to(&mut out);
        out.extend_from_slice(&bytes[PacketHeader::SIZE..]);
        trace!(node = %self.node_id, from = %header.from, to = %header.to, seq = header.seq, hops = hops + 1, "Forwarding");
        Some(out)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Hop count of a sender whose frame travelled `hops_travelled` relays
pub fn hop_count(hops_travelled: u8) -> u8 {
    hops_travelled.saturating_add(1)
}
