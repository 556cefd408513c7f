//! Integration tests for the reliable transport over a lossy link.
//!
//! Two transports talk through recording radios; the test decides which
//! frames cross the link and advances the clock by hand.

use meshcam_core::protocol::packet::Frame;
use meshcam_core::{
    Millis, NodeId, PacketType, Priority, Radio, ReliableTransport, RtpConfig, RtpEvent, TransmissionErrorKind,
    TransmissionState,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const A: NodeId = NodeId::from_u32(0xA);
const B: NodeId = NodeId::from_u32(0xB);

/// Records every frame with the time it went out
#[derive(Debug, Default)]
struct RecordingRadio {
    now: Millis,
    sent: Vec<(Millis, Vec<u8>)>,
}

impl Radio for RecordingRadio {
    fn send_raw(&mut self, _destination: NodeId, data: &[u8]) -> bool {
        self.sent.push((self.now, data.to_vec()));
        true
    }

    fn receive_raw(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn last_rssi(&self) -> i16 {
        -65
    }
}

impl RecordingRadio {
    fn drain(&mut self) -> Vec<Vec<u8>> {
        self.sent.drain(..).map(|(_, bytes)| bytes).collect()
    }
}

fn fast_config() -> RtpConfig {
    RtpConfig::default()
        .with_bandwidth(1_000_000)
        .with_adaptive_bandwidth(false)
}

fn fragment_index(bytes: &[u8]) -> Option<u8> {
    Frame::from_bytes(bytes)
        .expect("well-formed frame")
        .fragment
        .map(|info| info.index)
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn test_shuffled_fragments_reassemble() {
    let mut a = ReliableTransport::new(A, fast_config());
    let mut b = ReliableTransport::new(B, fast_config());
    let (mut radio_a, mut radio_b) = (RecordingRadio::default(), RecordingRadio::default());

    let payload = image(2000);
    let tx = a
        .transmit_data(B, PacketType::TaskResult, &payload, Priority::Normal, true)
        .expect("queued");

    // One full frame fits the bucket per millisecond
    for now in 0..20 {
        radio_a.now = now;
        a.process(now, &mut radio_a);
    }
    let mut frames = radio_a.drain();
    assert_eq!(frames.len(), 8);

    frames.shuffle(&mut StdRng::seed_from_u64(99));
    let deliveries: Vec<_> = frames
        .iter()
        .filter_map(|bytes| b.handle_frame(bytes, -65, 100, &mut radio_b))
        .collect();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].payload, payload);
    assert_eq!(deliveries[0].from, A);
    assert_eq!(deliveries[0].packet_type, PacketType::TaskResult);

    for ack in radio_b.drain() {
        assert!(a.handle_frame(&ack, -65, 150, &mut radio_a).is_none());
    }
    let events = a.process(150, &mut radio_a);
    assert_eq!(events, vec![RtpEvent::Complete { tx_id: tx, success: true }]);
    let status = a.transmission_status(tx).expect("status kept");
    assert_eq!(status.state, TransmissionState::Acked);
    assert_eq!(status.fragments_acked, 8);
}

#[test]
fn test_missing_fragment_fails_both_ends() {
    let mut a = ReliableTransport::new(A, fast_config());
    let mut b = ReliableTransport::new(B, fast_config());
    let (mut radio_a, mut radio_b) = (RecordingRadio::default(), RecordingRadio::default());

    let tx = a
        .transmit_data(B, PacketType::TaskResult, &image(2000), Priority::Normal, true)
        .expect("queued");

    let mut errors = Vec::new();
    let mut delivered = 0;
    let mut now = 0;
    while now <= 32_000 {
        radio_a.now = now;
        radio_b.now = now;
        for event in a.process(now, &mut radio_a) {
            if let RtpEvent::Error { tx_id, kind } = event {
                errors.push((now, tx_id, kind));
            }
        }
        b.process(now, &mut radio_b);

        for bytes in radio_a.drain() {
            if fragment_index(&bytes) == Some(4) {
                continue;
            }
            if b.handle_frame(&bytes, -65, now, &mut radio_b).is_some() {
                delivered += 1;
            }
        }
        for bytes in radio_b.drain() {
            a.handle_frame(&bytes, -65, now, &mut radio_a);
        }
        now += if now < 20 { 1 } else { 100 };
    }

    assert_eq!(delivered, 0);
    assert_eq!(errors.len(), 1);
    let (at, tx_id, kind) = errors[0];
    assert_eq!(tx_id, tx);
    assert_eq!(kind, TransmissionErrorKind::ReassemblyTimeout);
    assert!(at > 30_000 && at <= 30_200, "failed at {at}");
    assert_eq!(b.statistics(now).reassembly_timeouts, 1);
    assert_eq!(
        a.transmission_status(tx).map(|s| s.fragments_acked),
        Some(7)
    );
}

#[test]
fn test_lost_acks_deliver_once() {
    let mut a = ReliableTransport::new(A, fast_config());
    let mut b = ReliableTransport::new(B, fast_config());
    let (mut radio_a, mut radio_b) = (RecordingRadio::default(), RecordingRadio::default());

    let tx = a
        .transmit_data(B, PacketType::TaskResult, b"motion at gate", Priority::High, true)
        .expect("queued");

    let mut delivered = 0;
    let mut acks_dropped = 0;
    let mut completed = None;
    let mut now = 0;
    while now <= 20_000 && completed.is_none() {
        for event in a.process(now, &mut radio_a) {
            if let RtpEvent::Complete { tx_id, success } = event {
                assert_eq!(tx_id, tx);
                completed = Some(success);
            }
        }
        for bytes in radio_a.drain() {
            if b.handle_frame(&bytes, -65, now, &mut radio_b).is_some() {
                delivered += 1;
            }
        }
        for bytes in radio_b.drain() {
            if acks_dropped < 2 {
                acks_dropped += 1;
                continue;
            }
            a.handle_frame(&bytes, -65, now, &mut radio_a);
        }
        now += 100;
    }

    assert_eq!(completed, Some(true));
    assert_eq!(delivered, 1);
    let status = a.transmission_status(tx).expect("status kept");
    assert_eq!(status.attempts, 3);
    assert_eq!(b.statistics(now).duplicates_dropped, 2);
}

#[test]
fn test_high_reliability_gives_up_after_ten_sends() {
    let mut a = ReliableTransport::new(A, RtpConfig::high_reliability());
    let mut radio = RecordingRadio::default();

    let tx = a
        .transmit_data(B, PacketType::TaskAssign, b"capture", Priority::Normal, true)
        .expect("queued");

    let mut events = Vec::new();
    let mut now = 0;
    while now <= 300_000 {
        radio.now = now;
        events.extend(a.process(now, &mut radio));
        now += 100;
    }

    assert_eq!(radio.sent.len(), 10);
    let failures: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, RtpEvent::Error { .. }))
        .collect();
    assert_eq!(
        failures,
        vec![&RtpEvent::Error {
            tx_id: tx,
            kind: TransmissionErrorKind::RetriesExhausted
        }]
    );
    assert!(events.contains(&RtpEvent::Complete { tx_id: tx, success: false }));
    let status = a.transmission_status(tx).expect("status kept");
    assert_eq!(status.state, TransmissionState::Failed);
    assert_eq!(status.attempts, 10);
}

#[test]
fn test_token_bucket_bounds_any_second() {
    let config = RtpConfig::default()
        .with_bandwidth(1000)
        .with_adaptive_bandwidth(false);
    let mut a = ReliableTransport::new(A, config);
    let mut radio = RecordingRadio::default();

    let frames = 40;
    for _ in 0..frames {
        a.transmit_data(B, PacketType::TaskResult, &[0x42; 100], Priority::Normal, false)
            .expect("queued");
    }

    let mut now = 0;
    while now <= 10_000 {
        radio.now = now;
        a.process(now, &mut radio);
        now += 10;
    }

    assert_eq!(radio.sent.len(), frames);
    assert!(radio.sent.iter().all(|(_, bytes)| bytes.len() == 113));
    let capacity = 13 + 4 + 256;
    for (start, _) in &radio.sent {
        let in_window: usize = radio
            .sent
            .iter()
            .filter(|(t, _)| *t >= *start && *t < start + 1000)
            .map(|(_, bytes)| bytes.len())
            .sum();
        assert!(in_window <= 1000 + capacity, "{in_window} bytes in the second from {start}");
    }
}
