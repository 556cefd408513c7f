//! Reliable Transmission Protocol
//!
//! Moves payloads over a lossy, slow radio:
//!
//! - **Priority scheduling**: five levels, highest first, FIFO within a level
//! - **Bandwidth limiting**: token bucket with loss-driven rate adaptation
//! - **Fragmentation**: large payloads split into ordered, individually
//!   acknowledged fragments
//! - **Retry**: per-frame ACK timeout with exponential backoff
//! - **Duplicate suppression**: retransmissions are re-acknowledged but
//!   delivered to the application at most once
//!
//! The transport never blocks and never owns a clock. Callers pass the
//! current time and the radio into [`ReliableTransport::process`] and
//! [`ReliableTransport::handle_frame`]; completions come back as
//! [`RtpEvent`] values.

pub mod fragment;
pub mod stats;
pub mod throttle;
pub mod transmission;

pub use fragment::{split_payload, Reassembler, MAX_FRAGMENTS};
pub use stats::BandwidthStats;
pub use throttle::{RateController, TokenBucket};
pub use transmission::{Priority, TransmissionErrorKind, TransmissionState, TransmissionStatus, TxId};

use crate::config::RtpConfig;
use crate::error::{MeshError, MeshResult, ProtocolError};
use crate::protocol::dedup::{DedupVerdict, DedupWindow};
use crate::protocol::packet::{FragmentInfo, Frame, NodeId, PacketHeader, PacketType};
use crate::traits::Radio;
use crate::Millis;
use stats::StatsTracker;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, trace, warn};
use transmission::{FrameSlot, Transmission};

/// Outcome notifications produced by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpEvent {
    /// Transmission reached a terminal state
    Complete { tx_id: TxId, success: bool },
    /// Transmission failed or expired
    Error { tx_id: TxId, kind: TransmissionErrorKind },
}

/// A message body delivered to the layer above, exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: NodeId,
    pub to: NodeId,
    pub packet_type: PacketType,
    pub payload: Vec<u8>,
    /// Hops the final frame travelled through relays
    pub hops: u8,
    pub rssi: i16,
    pub seq: u16,
}

/// Why a frame could not go out this tick
enum SendBlock {
    /// Token bucket empty for this priority
    Throttled,
    /// Radio refused the frame
    RadioBusy,
}

/// Per-node reliable transport
#[derive(Debug)]
pub struct ReliableTransport {
    node_id: NodeId,
    config: RtpConfig,
    next_tx: u32,
    next_seq: u16,
    next_msg_id: u16,
    transmissions: BTreeMap<TxId, Transmission>,
    /// Outstanding frame sequence numbers waiting for an ACK
    awaiting: HashMap<u16, TxId>,
    relay_queue: VecDeque<Vec<u8>>,
    bucket: TokenBucket,
    rate: RateController,
    dedup: DedupWindow,
    reassembler: Reassembler,
    stats: StatsTracker,
    history: VecDeque<TransmissionStatus>,
    events: Vec<RtpEvent>,
}

impl ReliableTransport {
    pub fn new(node_id: NodeId, config: RtpConfig) -> Self {
        let frame_budget = PacketHeader::SIZE + 4 + config.max_payload_size;
        Self {
            node_id,
            next_tx: 1,
            next_seq: rand::random(),
            next_msg_id: rand::random(),
            transmissions: BTreeMap::new(),
            awaiting: HashMap::new(),
            relay_queue: VecDeque::new(),
            bucket: TokenBucket::new(config.max_bytes_per_second, frame_budget),
            rate: RateController::new(
                config.max_bytes_per_second,
                config.min_bytes_per_second,
                config.max_bytes_per_second_ceiling,
                config.bandwidth_eval_interval_ms,
            ),
            dedup: DedupWindow::new(config.dedup_window, 256),
            reassembler: Reassembler::new(config.reassembly_timeout_ms),
            stats: StatsTracker::new(),
            history: VecDeque::with_capacity(config.status_history),
            events: Vec::new(),
            config,
        }
    }

    /// Start sequence numbers at a known value
    pub fn with_initial_seq(mut self, seq: u16) -> Self {
        self.next_seq = seq;
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &RtpConfig {
        &self.config
    }

    /// Transmissions not yet in a terminal state
    pub fn queue_len(&self) -> usize {
        self.transmissions.len()
    }

    /// Current token bucket rate in bytes per second
    pub fn rate_limit(&self) -> u32 {
        self.bucket.rate()
    }

    fn allocate_seq(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    fn allocate_tx(&mut self) -> TxId {
        let id = TxId::new(self.next_tx);
        self.next_tx = self.next_tx.checked_add(1).unwrap_or(1);
        id
    }

    /// Queue a payload for delivery
    ///
    /// Never blocks. A saturated queue is reported as `MeshError::QueueFull`.
    /// Broadcasts are never acknowledged regardless of `require_ack`.
    pub fn transmit_data(
        &mut self,
        destination: NodeId,
        packet_type: PacketType,
        payload: &[u8],
        priority: Priority,
        require_ack: bool,
    ) -> MeshResult<TxId> {
        self.enqueue(destination, packet_type, payload, priority, require_ack, None)
    }

    /// Like [`transmit_data`](Self::transmit_data), expiring at `deadline`
    pub fn transmit_with_deadline(
        &mut self,
        destination: NodeId,
        packet_type: PacketType,
        payload: &[u8],
        priority: Priority,
        require_ack: bool,
        deadline: Millis,
    ) -> MeshResult<TxId> {
        self.enqueue(destination, packet_type, payload, priority, require_ack, Some(deadline))
    }

    fn enqueue(
        &mut self,
        destination: NodeId,
        packet_type: PacketType,
        payload: &[u8],
        priority: Priority,
        require_ack: bool,
        deadline: Option<Millis>,
    ) -> MeshResult<TxId> {
        if packet_type == PacketType::Ack {
            return Err(ProtocolError::InvalidField {
                field: "message type",
                value: packet_type.as_byte() as u32,
            }
            .into());
        }
        if self.transmissions.len() >= self.config.max_queue_size {
            self.stats.stats.queue_drops += 1;
            debug!(node = %self.node_id, depth = self.transmissions.len(), "Transmission queue full");
            return Err(MeshError::QueueFull);
        }

        let chunks = split_payload(payload, self.config.max_payload_size);
        if chunks.len() > MAX_FRAGMENTS {
            return Err(MeshError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_FRAGMENTS * self.config.max_payload_size,
            });
        }
        // Every fragment must leave within the reassembly window
        if chunks.len() > 1 {
            if let Some(rate) = self.bucket.rate_for(priority) {
                let overhead = PacketHeader::SIZE + 4;
                let wire_bytes = payload.len() + chunks.len() * overhead;
                let budget = (rate.saturating_mul(self.config.reassembly_timeout_ms) / 1000) as usize;
                if wire_bytes > budget {
                    debug!(
                        node = %self.node_id,
                        bytes = payload.len(),
                        wire_bytes,
                        budget,
                        "Payload cannot finish inside the reassembly window"
                    );
                    return Err(MeshError::PayloadTooLarge {
                        size: payload.len(),
                        max: budget.saturating_sub(chunks.len() * overhead),
                    });
                }
            }
        }

        let require_ack = require_ack && !destination.is_broadcast();
        let count = chunks.len();
        let msg_id = if count > 1 {
            let id = self.next_msg_id;
            self.next_msg_id = self.next_msg_id.wrapping_add(1);
            Some(id)
        } else {
            None
        };

        let mut slots = Vec::with_capacity(count);
        for (index, chunk) in chunks.into_iter().enumerate() {
            let mut header = PacketHeader::new(packet_type, self.node_id, destination, self.allocate_seq());
            header.flags.set_want_ack(require_ack);
            header.flags.set_priority(priority);
            let frame = match msg_id {
                Some(msg_id) => Frame::fragment(
                    header,
                    FragmentInfo {
                        msg_id,
                        index: index as u8,
                        count: count as u8,
                    },
                    chunk,
                ),
                None => Frame::new(header, chunk),
            };
            slots.push(FrameSlot::new(&frame));
        }

        let tx_id = self.allocate_tx();
        debug!(
            node = %self.node_id,
            tx = %tx_id,
            to = %destination,
            kind = ?packet_type,
            ?priority,
            bytes = payload.len(),
            fragments = count,
            require_ack,
            "Transmission queued"
        );
        self.transmissions.insert(
            tx_id,
            Transmission {
                tx_id,
                destination,
                packet_type,
                priority,
                require_ack,
                state: TransmissionState::Queued,
                deadline,
                first_sent_at: None,
                slots,
                error: None,
            },
        );
        Ok(tx_id)
    }

    /// Drop a transmission that has not been sent yet
    pub fn cancel(&mut self, tx_id: TxId) -> bool {
        let cancellable = self
            .transmissions
            .get(&tx_id)
            .is_some_and(|tx| tx.state == TransmissionState::Queued && tx.first_sent_at.is_none());
        if cancellable {
            if let Some(mut tx) = self.transmissions.remove(&tx_id) {
                tx.state = TransmissionState::Failed;
                tx.error = Some(TransmissionErrorKind::Cancelled);
                self.remember(tx.status());
                debug!(tx = %tx_id, "Transmission cancelled");
            }
        }
        cancellable
    }

    /// Current or final status of a transmission
    pub fn transmission_status(&self, tx_id: TxId) -> Option<TransmissionStatus> {
        self.transmissions
            .get(&tx_id)
            .map(Transmission::status)
            .or_else(|| self.history.iter().rev().find(|s| s.tx_id == tx_id).cloned())
    }

    /// Counters and rolling rates
    pub fn statistics(&mut self, now: Millis) -> BandwidthStats {
        self.stats.stats.reassembly_timeouts = self.reassembler.timeouts();
        self.stats.stats.duplicates_dropped = self.dedup.duplicates();
        let rate = self.bucket.rate();
        let depth = self.transmissions.len();
        self.stats.snapshot(now, rate, depth)
    }

    /// Queue a received frame for flooding onward at background priority
    pub fn forward(&mut self, bytes: Vec<u8>) -> bool {
        if self.relay_queue.len() >= self.config.max_queue_size {
            return false;
        }
        self.relay_queue.push_back(bytes);
        true
    }

    fn remember(&mut self, status: TransmissionStatus) {
        if self.config.status_history == 0 {
            return;
        }
        while self.history.len() >= self.config.status_history {
            self.history.pop_front();
        }
        self.history.push_back(status);
    }

    /// Move a transmission to a terminal state and notify
    fn finish(&mut self, tx_id: TxId, state: TransmissionState, error: Option<TransmissionErrorKind>) {
        let Some(mut tx) = self.transmissions.remove(&tx_id) else {
            return;
        };
        for slot in &tx.slots {
            if self.awaiting.get(&slot.seq) == Some(&tx_id) {
                self.awaiting.remove(&slot.seq);
            }
        }
        tx.state = state;
        tx.error = error;
        let status = tx.status();
        self.remember(status);

        match (state, error) {
            (TransmissionState::Acked, _) => {
                self.stats.stats.transmissions_acked += 1;
                trace!(tx = %tx_id, "Transmission complete");
                self.events.push(RtpEvent::Complete { tx_id, success: true });
            }
            (TransmissionState::Expired, _) => {
                self.stats.stats.transmissions_expired += 1;
                warn!(tx = %tx_id, to = %tx.destination, "Transmission expired");
                self.events.push(RtpEvent::Error {
                    tx_id,
                    kind: TransmissionErrorKind::DeadlineExpired,
                });
                self.events.push(RtpEvent::Complete { tx_id, success: false });
            }
            (_, kind) => {
                self.stats.stats.transmissions_failed += 1;
                if tx.require_ack {
                    let kind = kind.unwrap_or(TransmissionErrorKind::RetriesExhausted);
                    warn!(
                        tx = %tx_id,
                        to = %tx.destination,
                        attempts = tx.attempts(),
                        acked = tx.done_count(),
                        of = tx.slots.len(),
                        %kind,
                        "Transmission failed"
                    );
                    self.events.push(RtpEvent::Error { tx_id, kind });
                    self.events.push(RtpEvent::Complete { tx_id, success: false });
                } else {
                    debug!(tx = %tx_id, "Fire-and-forget transmission dropped");
                }
            }
        }
    }

    /// Current ACK wait, scaled by round-trip time when adaptive
    fn ack_timeout(&self) -> u64 {
        let base = self.config.ack_timeout_ms;
        match (self.config.adaptive_retry, self.stats.stats.latency_ema_ms) {
            (true, Some(rtt)) => ((rtt * 2.5) as u64).max(base / 4).min(base.saturating_mul(2)),
            _ => base,
        }
    }

    /// Delay before resending a frame that has been sent `attempts` times
    fn backoff(config: &RtpConfig, attempts: u8) -> u64 {
        let exponent = attempts.saturating_sub(1).min(20) as u32;
        config
            .initial_retry_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(config.max_retry_delay_ms)
    }

    /// Parse one received frame
    ///
    /// ACKs settle outstanding frames. Frames addressed to us are
    /// acknowledged when asked, even if already delivered, then filtered
    /// for duplicates and reassembled. Returns a payload only the first
    /// time it completes.
    pub fn handle_frame(&mut self, bytes: &[u8], rssi: i16, now: Millis, radio: &mut dyn Radio) -> Option<Delivery> {
        let frame = match Frame::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.stats.malformed_dropped += 1;
                debug!(node = %self.node_id, error = %e, len = bytes.len(), "Dropping malformed frame");
                return None;
            }
        };
        self.stats.record_rx(bytes.len());

        let header = &frame.header;
        if header.from == self.node_id || !header.is_for_node(self.node_id) {
            return None;
        }

        if let Some(acked) = frame.acked_seq() {
            if header.to == self.node_id {
                self.on_ack(header.from, acked, now);
            }
            return None;
        }

        if header.flags.want_ack() && header.to == self.node_id {
            self.send_ack(header.from, header.seq, now, radio);
        }

        let verdict = self.dedup.check_and_record(
            header.from,
            header.seq,
            header.packet_type == PacketType::Discovery,
            now,
        );
        if verdict == DedupVerdict::Duplicate {
            trace!(node = %self.node_id, from = %header.from, seq = header.seq, "Duplicate suppressed");
            return None;
        }

        let hops = header.flags.hops();
        let (from, to, packet_type, seq) = (header.from, header.to, header.packet_type, header.seq);
        let payload = match frame.fragment {
            Some(info) => self.reassembler.accept(from, packet_type, info, frame.body, now)?.payload,
            None => frame.body,
        };

        Some(Delivery {
            from,
            to,
            packet_type,
            payload,
            hops,
            rssi,
            seq,
        })
    }

    fn send_ack(&mut self, to: NodeId, acked_seq: u16, now: Millis, radio: &mut dyn Radio) {
        let seq = self.allocate_seq();
        let bytes = Frame::ack(self.node_id, to, seq, acked_seq).to_bytes();
        if radio.send_raw(to, &bytes) {
            self.stats.stats.acks_sent += 1;
            self.stats.record_tx(bytes.len(), now);
        } else {
            self.stats.stats.radio_rejections += 1;
        }
    }

    fn on_ack(&mut self, from: NodeId, acked_seq: u16, now: Millis) {
        self.stats.stats.acks_received += 1;
        let Some(&tx_id) = self.awaiting.get(&acked_seq) else {
            trace!(node = %self.node_id, seq = acked_seq, "Stale ACK");
            return;
        };
        let Some(tx) = self.transmissions.get_mut(&tx_id) else {
            self.awaiting.remove(&acked_seq);
            return;
        };
        if tx.destination != from {
            return;
        }
        let Some(slot) = tx.slots.iter_mut().find(|s| s.seq == acked_seq) else {
            return;
        };
        self.awaiting.remove(&acked_seq);
        if slot.done {
            return;
        }
        slot.done = true;
        slot.in_flight = false;

        // Only unambiguous samples: frames acknowledged on their first send
        let rtt = match (slot.attempts, slot.last_sent) {
            (1, Some(sent)) => Some(now.saturating_sub(sent)),
            _ => None,
        };
        let complete = tx.all_done();

        if let Some(rtt) = rtt {
            self.stats.record_rtt(rtt);
        }
        self.stats.record_outcome(true);
        self.rate.record_delivered();
        if complete {
            self.finish(tx_id, TransmissionState::Acked, None);
        }
    }

    /// Advance timers and send whatever the limiter allows
    pub fn process(&mut self, now: Millis, radio: &mut dyn Radio) -> Vec<RtpEvent> {
        self.reassembler.expire(now);
        self.check_timers(now);

        if self.config.adaptive_bandwidth {
            if let Some(rate) = self.rate.evaluate(now) {
                self.bucket.set_rate(rate, now);
            }
        }

        self.send_ready(now, radio);
        std::mem::take(&mut self.events)
    }

    fn check_timers(&mut self, now: Millis) {
        let ack_timeout = self.ack_timeout();
        let mut finished = Vec::new();

        for tx in self.transmissions.values_mut() {
            if tx.deadline.is_some_and(|deadline| now > deadline) {
                finished.push((tx.tx_id, TransmissionState::Expired, None));
                continue;
            }

            if tx.require_ack && tx.is_fragmented() {
                if let Some(first) = tx.first_sent_at {
                    if now.saturating_sub(first) > self.config.reassembly_timeout_ms {
                        finished.push((
                            tx.tx_id,
                            TransmissionState::Failed,
                            Some(TransmissionErrorKind::ReassemblyTimeout),
                        ));
                        continue;
                    }
                }
            }

            let mut exhausted = false;
            let mut rescheduled = false;
            for slot in tx.slots.iter_mut().filter(|s| s.in_flight) {
                let Some(sent) = slot.last_sent else { continue };
                let timeout_at = sent.saturating_add(ack_timeout);
                if now < timeout_at {
                    continue;
                }
                slot.in_flight = false;
                self.stats.record_outcome(false);
                self.rate.record_lost();

                if slot.attempts >= self.config.max_retries {
                    exhausted = true;
                    break;
                }
                slot.ready_at = timeout_at.saturating_add(Self::backoff(&self.config, slot.attempts));
                rescheduled = true;
                debug!(
                    tx = %tx.tx_id,
                    seq = slot.seq,
                    attempts = slot.attempts,
                    retry_at = slot.ready_at,
                    "ACK timeout, retry scheduled"
                );
            }

            if exhausted {
                finished.push((
                    tx.tx_id,
                    TransmissionState::Failed,
                    Some(TransmissionErrorKind::RetriesExhausted),
                ));
            } else if rescheduled {
                tx.state = TransmissionState::Queued;
            }
        }

        for (tx_id, state, error) in finished {
            self.finish(tx_id, state, error);
        }
    }

    fn send_ready(&mut self, now: Millis, radio: &mut dyn Radio) {
        let mut budget = self.config.max_packets_per_tick;

        let mut order: Vec<(Priority, TxId)> = self
            .transmissions
            .values()
            .filter(|tx| tx.has_ready_frame(now))
            .map(|tx| (tx.priority, tx.tx_id))
            .collect();
        order.sort();

        for (_, tx_id) in order {
            if budget == 0 {
                return;
            }
            match self.send_transmission(tx_id, now, radio, &mut budget) {
                Ok(()) => {}
                Err(SendBlock::Throttled) | Err(SendBlock::RadioBusy) => return,
            }
        }

        while budget > 0 {
            let Some(bytes) = self.relay_queue.front() else {
                break;
            };
            let len = bytes.len();
            if !self.bucket.try_consume(len, Priority::Background, now) {
                break;
            }
            if !radio.send_raw(NodeId::BROADCAST, bytes) {
                self.bucket.refund(len, Priority::Background);
                self.stats.stats.radio_rejections += 1;
                break;
            }
            self.relay_queue.pop_front();
            self.stats.record_tx(len, now);
            self.stats.stats.relayed += 1;
            budget -= 1;
        }
    }

    fn send_transmission(
        &mut self,
        tx_id: TxId,
        now: Millis,
        radio: &mut dyn Radio,
        budget: &mut usize,
    ) -> Result<(), SendBlock> {
        let max_retries = self.config.max_retries;
        let mut outcome = Ok(());
        let mut rejected_out = false;

        let Some(tx) = self.transmissions.get_mut(&tx_id) else {
            return Ok(());
        };

        for slot in tx.slots.iter_mut() {
            if *budget == 0 {
                break;
            }
            if !slot.is_ready(now) {
                continue;
            }
            let len = slot.bytes.len();
            if !self.bucket.try_consume(len, tx.priority, now) {
                outcome = Err(SendBlock::Throttled);
                break;
            }
            if !radio.send_raw(tx.destination, &slot.bytes) {
                self.bucket.refund(len, tx.priority);
                self.stats.stats.radio_rejections += 1;
                slot.rejections = slot.rejections.saturating_add(1);
                if slot.rejections > max_retries {
                    rejected_out = true;
                }
                outcome = Err(SendBlock::RadioBusy);
                break;
            }

            *budget -= 1;
            slot.attempts = slot.attempts.saturating_add(1);
            if slot.attempts > 1 {
                self.stats.stats.retransmissions += 1;
            }
            self.stats.record_tx(len, now);
            slot.last_sent = Some(now);
            tx.first_sent_at.get_or_insert(now);
            tx.state = TransmissionState::Sending;

            if tx.require_ack {
                slot.in_flight = true;
                self.awaiting.insert(slot.seq, tx_id);
            } else {
                slot.done = true;
            }
            trace!(tx = %tx_id, seq = slot.seq, attempt = slot.attempts, bytes = len, "Frame sent");
        }

        let all_done = tx.all_done();
        let waiting = tx.require_ack && !tx.has_ready_frame(now) && tx.slots.iter().any(|s| s.in_flight);
        if waiting {
            tx.state = TransmissionState::AwaitingAck;
        }

        if rejected_out {
            info!(tx = %tx_id, "Radio refused frames too many times");
            self.finish(tx_id, TransmissionState::Failed, Some(TransmissionErrorKind::RadioRejected));
        } else if all_done {
            self.finish(tx_id, TransmissionState::Acked, None);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Radio that records frames and can be told to refuse them
    #[derive(Debug, Default)]
    struct MockRadio {
        sent: Vec<(NodeId, Vec<u8>)>,
        refuse: bool,
    }

    impl Radio for MockRadio {
        fn send_raw(&mut self, destination: NodeId, data: &[u8]) -> bool {
            if self.refuse {
                return false;
            }
            self.sent.push((destination, data.to_vec()));
            true
        }

        fn receive_raw(&mut self) -> Option<Vec<u8>> {
            None
        }

        fn last_rssi(&self) -> i16 {
            -70
        }
    }

    const A: NodeId = NodeId::from_u32(0xA);
    const B: NodeId = NodeId::from_u32(0xB);

    fn fast_config() -> RtpConfig {
        RtpConfig::default()
            .with_bandwidth(1_000_000)
            .with_adaptive_bandwidth(false)
            .with_retry_delay(1000, 30_000)
    }

    fn transport(id: NodeId, config: RtpConfig) -> ReliableTransport {
        ReliableTransport::new(id, config).with_initial_seq(100)
    }

    /// Deliver every frame `from` sent to `to`, collecting deliveries
    fn pump(from: &mut MockRadio, to: &mut ReliableTransport, to_radio: &mut MockRadio, now: Millis) -> Vec<Delivery> {
        from.sent
            .drain(..)
            .filter_map(|(_, bytes)| to.handle_frame(&bytes, -60, now, to_radio))
            .collect()
    }

    #[test]
    fn test_tx_ids_start_at_one() {
        let mut a = transport(A, fast_config());
        let first = a.transmit_data(B, PacketType::TaskResult, b"x", Priority::Normal, true).unwrap();
        let second = a.transmit_data(B, PacketType::TaskResult, b"y", Priority::Normal, true).unwrap();
        assert_eq!(first.value(), 1);
        assert_eq!(second.value(), 2);
    }

    #[test]
    fn test_queue_full() {
        let mut a = transport(A, fast_config().with_queue_size(2));
        a.transmit_data(B, PacketType::TaskResult, b"1", Priority::Normal, true).unwrap();
        a.transmit_data(B, PacketType::TaskResult, b"2", Priority::Normal, true).unwrap();
        let err = a.transmit_data(B, PacketType::TaskResult, b"3", Priority::Normal, true);
        assert!(matches!(err, Err(MeshError::QueueFull)));
        assert_eq!(a.statistics(0).queue_drops, 1);
    }

    #[test]
    fn test_acked_delivery() {
        let (mut a, mut b) = (transport(A, fast_config()), transport(B, fast_config()));
        let (mut radio_a, mut radio_b) = (MockRadio::default(), MockRadio::default());

        let tx = a.transmit_data(B, PacketType::TaskResult, b"hello", Priority::Normal, true).unwrap();
        assert!(a.process(0, &mut radio_a).is_empty());
        assert_eq!(a.transmission_status(tx).unwrap().state, TransmissionState::AwaitingAck);

        let delivered = pump(&mut radio_a, &mut b, &mut radio_b, 40);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, b"hello");
        assert_eq!(delivered[0].from, A);

        // B's ACK goes straight to the radio
        assert_eq!(radio_b.sent.len(), 1);
        pump(&mut radio_b, &mut a, &mut radio_a, 80);
        let events = a.process(80, &mut radio_a);
        assert_eq!(events, vec![RtpEvent::Complete { tx_id: tx, success: true }]);

        let status = a.transmission_status(tx).unwrap();
        assert_eq!(status.state, TransmissionState::Acked);
        assert_eq!(status.attempts, 1);
        assert_eq!(a.statistics(80).latency_ema_ms, Some(80.0));
    }

    #[test]
    fn test_retries_exhausted_once() {
        let config = fast_config().with_max_retries(3).with_ack_timeout(1000).with_retry_delay(500, 10_000);
        let mut a = transport(A, config);
        let mut radio = MockRadio::default();
        let tx = a.transmit_data(B, PacketType::TaskAssign, b"job", Priority::High, true).unwrap();

        let mut events = Vec::new();
        for now in (0..20_000).step_by(50) {
            events.extend(a.process(now, &mut radio));
        }

        // Sends at 0, 1000 + 500, 2500 + 1000
        let sends = radio.sent.len();
        assert_eq!(sends, 3);
        let errors = events.iter().filter(|e| matches!(e, RtpEvent::Error { .. })).count();
        let completes = events.iter().filter(|e| matches!(e, RtpEvent::Complete { .. })).count();
        assert_eq!((errors, completes), (1, 1));
        assert!(events.contains(&RtpEvent::Error { tx_id: tx, kind: TransmissionErrorKind::RetriesExhausted }));

        let status = a.transmission_status(tx).unwrap();
        assert_eq!(status.state, TransmissionState::Failed);
        assert_eq!(status.attempts, 3);
    }

    #[test]
    fn test_backoff_schedule() {
        let config = fast_config().with_max_retries(4).with_ack_timeout(1000).with_retry_delay(500, 1500);
        let mut a = transport(A, config);
        let mut radio = MockRadio::default();
        a.transmit_data(B, PacketType::TaskAssign, b"job", Priority::Normal, true).unwrap();

        let mut send_times = Vec::new();
        for now in (0..20_000).step_by(10) {
            let before = radio.sent.len();
            a.process(now, &mut radio);
            if radio.sent.len() > before {
                send_times.push(now);
            }
        }
        // timeout 1000 then 500, 1000, then capped at 1500
        assert_eq!(send_times, vec![0, 1500, 3500, 6000]);
    }

    #[test]
    fn test_fire_and_forget_completes_on_send() {
        let mut a = transport(A, fast_config());
        let mut radio = MockRadio::default();
        let tx = a.transmit_data(B, PacketType::TaskResult, b"fyi", Priority::Low, false).unwrap();
        let events = a.process(0, &mut radio);
        assert_eq!(events, vec![RtpEvent::Complete { tx_id: tx, success: true }]);
        let frame = Frame::from_bytes(&radio.sent[0].1).unwrap();
        assert!(!frame.header.flags.want_ack());
    }

    #[test]
    fn test_broadcast_never_wants_ack() {
        let mut a = transport(A, fast_config());
        let mut radio = MockRadio::default();
        let tx = a.transmit_data(NodeId::BROADCAST, PacketType::Heartbeat, b"hb", Priority::Normal, true).unwrap();
        a.process(0, &mut radio);
        let frame = Frame::from_bytes(&radio.sent[0].1).unwrap();
        assert!(!frame.header.flags.want_ack());
        assert_eq!(a.transmission_status(tx).unwrap().state, TransmissionState::Acked);
    }

    #[test]
    fn test_duplicate_reacked_not_redelivered() {
        let mut b = transport(B, fast_config());
        let mut radio_b = MockRadio::default();
        let mut header = PacketHeader::new(PacketType::TaskResult, A, B, 7);
        header.flags.set_want_ack(true);
        let bytes = Frame::new(header, b"once".to_vec()).to_bytes();

        assert!(b.handle_frame(&bytes, -60, 0, &mut radio_b).is_some());
        assert!(b.handle_frame(&bytes, -60, 10, &mut radio_b).is_none());
        assert_eq!(radio_b.sent.len(), 2);
        let stats = b.statistics(10);
        assert_eq!(stats.acks_sent, 2);
        assert_eq!(stats.duplicates_dropped, 1);
    }

    #[test]
    fn test_malformed_counted() {
        let mut b = transport(B, fast_config());
        let mut radio = MockRadio::default();
        assert!(b.handle_frame(&[1, 2, 3], -60, 0, &mut radio).is_none());
        assert!(b.handle_frame(&[0xFF; 20], -60, 0, &mut radio).is_none());
        assert_eq!(b.statistics(0).malformed_dropped, 2);
    }

    #[test]
    fn test_frames_for_others_ignored() {
        let mut b = transport(B, fast_config());
        let mut radio = MockRadio::default();
        let mut header = PacketHeader::new(PacketType::TaskResult, A, NodeId::from_u32(0xC), 1);
        header.flags.set_want_ack(true);
        let bytes = Frame::new(header, vec![1]).to_bytes();
        assert!(b.handle_frame(&bytes, -60, 0, &mut radio).is_none());
        assert!(radio.sent.is_empty());
    }

    #[test]
    fn test_fragmented_delivery() {
        let (mut a, mut b) = (transport(A, fast_config()), transport(B, fast_config()));
        let (mut radio_a, mut radio_b) = (MockRadio::default(), MockRadio::default());
        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();

        let tx = a.transmit_data(B, PacketType::TaskResult, &payload, Priority::Normal, true).unwrap();
        // The bucket holds one full frame; each millisecond refills it
        for now in 0..8 {
            assert!(a.process(now, &mut radio_a).is_empty());
        }
        assert_eq!(radio_a.sent.len(), 8);
        assert_eq!(a.transmission_status(tx).unwrap().fragments_total, 8);

        radio_a.sent.reverse();
        let delivered = pump(&mut radio_a, &mut b, &mut radio_b, 10);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, payload);

        pump(&mut radio_b, &mut a, &mut radio_a, 20);
        let events = a.process(20, &mut radio_a);
        assert_eq!(events, vec![RtpEvent::Complete { tx_id: tx, success: true }]);
    }

    #[test]
    fn test_payload_too_large() {
        let mut a = transport(A, fast_config().with_max_payload_size(4));
        let err = a.transmit_data(B, PacketType::TaskResult, &[0u8; 4 * 256], Priority::Normal, true);
        assert!(matches!(err, Err(MeshError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_payload_must_fit_reassembly_window() {
        // 512 B/s over a 30 s window leaves 15360 wire bytes
        let mut a = transport(A, RtpConfig::low_bandwidth());
        let err = a.transmit_data(B, PacketType::TaskResult, &[0u8; 20_000], Priority::Normal, true);
        match err {
            Err(MeshError::PayloadTooLarge { size, max }) => {
                assert_eq!(size, 20_000);
                assert!(max < 15_360);
            }
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
        assert!(a.transmit_data(B, PacketType::TaskResult, &[0u8; 2_000], Priority::Normal, true).is_ok());
        // HIGH gets twice the rate, CRITICAL is unlimited
        assert!(a.transmit_data(B, PacketType::TaskResult, &[0u8; 20_000], Priority::High, true).is_ok());
        assert!(a.transmit_data(B, PacketType::TaskResult, &[0u8; 40_000], Priority::Critical, true).is_ok());
    }

    #[test]
    fn test_cancel_only_while_queued() {
        let mut a = transport(A, fast_config());
        let mut radio = MockRadio::default();
        let first = a.transmit_data(B, PacketType::TaskResult, b"1", Priority::Normal, true).unwrap();
        assert!(a.cancel(first));
        assert_eq!(a.transmission_status(first).unwrap().error, Some(TransmissionErrorKind::Cancelled));

        let second = a.transmit_data(B, PacketType::TaskResult, b"2", Priority::Normal, true).unwrap();
        a.process(0, &mut radio);
        assert!(!a.cancel(second));
        assert!(radio.sent.len() == 1);
    }

    #[test]
    fn test_deadline_expiry() {
        let mut a = transport(A, fast_config());
        let mut radio = MockRadio { refuse: true, ..Default::default() };
        let tx = a
            .transmit_with_deadline(B, PacketType::TaskResult, b"late", Priority::Normal, true, 500)
            .unwrap();
        assert!(a.process(400, &mut radio).is_empty());
        let events = a.process(501, &mut radio);
        assert_eq!(
            events,
            vec![
                RtpEvent::Error { tx_id: tx, kind: TransmissionErrorKind::DeadlineExpired },
                RtpEvent::Complete { tx_id: tx, success: false },
            ]
        );
        assert_eq!(a.transmission_status(tx).unwrap().state, TransmissionState::Expired);
    }

    #[test]
    fn test_radio_rejection_fails() {
        let mut a = transport(A, fast_config().with_max_retries(2));
        let mut radio = MockRadio { refuse: true, ..Default::default() };
        let tx = a.transmit_data(B, PacketType::TaskResult, b"x", Priority::Normal, true).unwrap();
        let mut events = Vec::new();
        for now in 0..5 {
            events.extend(a.process(now, &mut radio));
        }
        assert!(events.contains(&RtpEvent::Error { tx_id: tx, kind: TransmissionErrorKind::RadioRejected }));
    }

    #[test]
    fn test_priority_order_and_critical_bypass() {
        let config = fast_config().with_bandwidth(100);
        let mut a = transport(A, config);
        let mut radio = MockRadio::default();
        let payload = [0u8; 200];
        let low = a.transmit_data(B, PacketType::TaskResult, &payload, Priority::Low, false).unwrap();
        let critical = a.transmit_data(B, PacketType::TaskResult, &payload, Priority::Critical, false).unwrap();
        let normal = a.transmit_data(B, PacketType::TaskResult, &payload, Priority::Normal, false).unwrap();

        let events = a.process(0, &mut radio);
        // Critical first, then one normal frame fits the initial bucket
        assert_eq!(
            events,
            vec![
                RtpEvent::Complete { tx_id: critical, success: true },
                RtpEvent::Complete { tx_id: normal, success: true },
            ]
        );
        assert_eq!(a.transmission_status(low).unwrap().state, TransmissionState::Queued);
    }

    #[test]
    fn test_adaptive_retry_timeout() {
        let mut config = fast_config();
        config.adaptive_retry = true;
        let mut a = transport(A, config);
        assert_eq!(a.ack_timeout(), 5000);
        a.stats.record_rtt(100);
        assert_eq!(a.ack_timeout(), 1250);
        a.stats.record_rtt(100_000);
        assert_eq!(a.ack_timeout(), 10_000);
        assert_eq!(ReliableTransport::backoff(a.config(), 1), 1000);
        assert_eq!(ReliableTransport::backoff(a.config(), 3), 4000);
    }
}
