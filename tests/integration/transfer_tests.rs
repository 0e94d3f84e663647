//! Transfer engine against a recording transport, checked from the peer's
//! side with the reassembler.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use trichter::error::{TransferError, TransportError};
use trichter::transfer::packet::{DEFAULT_SDU_SIZE, MAX_SDU_SIZE};
use trichter::transfer::reassembly::TransferReassembler;
use trichter::transfer::{ChunkSent, MAX_INDICATION_RETRIES, TransferEngine};

use super::mock_hw::{RecordingTransport, TransportState};

const CONN: u16 = 7;

fn engine(ack_timeout: Duration) -> (Arc<TransferEngine>, Arc<TransportState>) {
    let state = Arc::new(TransportState::default());
    let engine = TransferEngine::new(Box::new(RecordingTransport(Arc::clone(&state))), ack_timeout);
    (Arc::new(engine), state)
}

fn linked(ack_timeout: Duration) -> (Arc<TransferEngine>, Arc<TransportState>) {
    let (e, s) = engine(ack_timeout);
    assert!(e.on_connected(CONN));
    e.on_subscription_changed(true);
    (e, s)
}

fn pour(n: u32) -> Vec<u32> {
    (0..n).map(|i| i * 1_250 + 17).collect()
}

// ── Happy path ───────────────────────────────────────────────

#[test]
fn ten_timestamps_at_default_sdu() {
    let (e, tx) = linked(Duration::from_millis(200));
    let stamps = pour(10);

    e.prepare(&stamps).unwrap();
    e.send_start(300).unwrap();

    let mut sent = Vec::new();
    loop {
        e.on_indication_complete(Ok(()));
        let chunk = e.send_chunk().unwrap();
        sent.push(chunk);
        if chunk == ChunkSent::End {
            break;
        }
    }

    assert_eq!(
        sent,
        vec![
            ChunkSent::Data { chunk_index: 0, len: 16 },
            ChunkSent::Data { chunk_index: 1, len: 16 },
            ChunkSent::Data { chunk_index: 2, len: 8 },
            ChunkSent::End,
        ]
    );
    assert_eq!(tx.flags(), vec![0xAA, 0xBB, 0xBB, 0xBB, 0xCC]);
    assert!(!e.is_sending());
    assert_eq!(e.cursor(), 40);

    let mut peer = TransferReassembler::new();
    let mut done = None;
    for p in tx.packets() {
        if let Some(t) = peer.feed(&p).unwrap() {
            done = Some(t);
        }
    }
    let done = done.expect("END rebuilds the pour");
    assert_eq!(done.calibration, 300);
    assert_eq!(done.timestamps, stamps);
}

#[test]
fn negotiated_sdu_sets_chunk_size() {
    let (e, tx) = linked(Duration::from_millis(200));
    assert_eq!(e.on_mtu_updated(100, 185), 93);

    e.prepare(&pour(40)).unwrap();
    e.send_start(1).unwrap();
    let mut lens = Vec::new();
    loop {
        e.on_indication_complete(Ok(()));
        match e.send_chunk().unwrap() {
            ChunkSent::Data { len, .. } => lens.push(len),
            _ => break,
        }
    }
    assert_eq!(lens, vec![93, 67]);
    assert_eq!(tx.packets()[0][3], 93);
}

#[test]
fn mtu_is_clamped_and_reset_on_disconnect() {
    let (e, _) = linked(Duration::from_millis(200));
    assert_eq!(e.on_mtu_updated(23, 23), DEFAULT_SDU_SIZE);
    assert_eq!(e.on_mtu_updated(517, 517), MAX_SDU_SIZE);
    e.on_disconnected(CONN);
    assert_eq!(e.sdu_size(), DEFAULT_SDU_SIZE);
}

// ── Preconditions ────────────────────────────────────────────

#[test]
fn start_needs_a_link_and_a_session() {
    let (e, tx) = engine(Duration::from_millis(200));
    e.prepare(&pour(3)).unwrap();
    assert_eq!(e.send_start(300), Err(TransferError::NotConnected));

    let (e, _) = linked(Duration::from_millis(200));
    assert_eq!(e.send_start(300), Err(TransferError::Cancelled));
    assert_eq!(e.prepare(&[]), Err(TransferError::InvalidLength));
    assert!(tx.packets().is_empty());
}

#[test]
fn send_chunk_without_session_is_idle() {
    let (e, tx) = linked(Duration::from_millis(200));
    assert_eq!(e.send_chunk(), Ok(ChunkSent::Idle));
    assert!(tx.packets().is_empty());
}

// ── Flow control ─────────────────────────────────────────────

#[test]
fn missing_ack_times_out_without_advancing() {
    let (e, tx) = linked(Duration::from_millis(50));
    e.prepare(&pour(4)).unwrap();
    e.send_start(300).unwrap();

    assert_eq!(e.send_chunk(), Err(TransferError::Timeout));
    assert_eq!(e.cursor(), 0);
    assert_eq!(tx.flags(), vec![0xAA]);

    e.on_indication_complete(Ok(()));
    assert_eq!(
        e.send_chunk(),
        Ok(ChunkSent::Data { chunk_index: 0, len: 16 })
    );
}

#[test]
fn disconnect_wakes_a_blocked_sender() {
    let (e, _) = linked(Duration::from_secs(5));
    e.prepare(&pour(10)).unwrap();
    e.send_start(300).unwrap();

    let sender = Arc::clone(&e);
    let began = Instant::now();
    let waiter = thread::spawn(move || sender.send_chunk());

    thread::sleep(Duration::from_millis(50));
    e.on_disconnected(CONN);

    let result = waiter.join().unwrap();
    assert_eq!(result, Err(TransferError::NotConnected));
    assert!(began.elapsed() < Duration::from_secs(2));
    assert!(!e.is_sending());
    assert!(!e.is_connected());
}

#[test]
fn unsubscribe_cancels_the_session() {
    let (e, _) = linked(Duration::from_millis(200));
    e.prepare(&pour(10)).unwrap();
    e.send_start(300).unwrap();
    e.on_indication_complete(Ok(()));
    e.send_chunk().unwrap();

    e.on_subscription_changed(false);
    assert!(!e.is_sending());
    assert!(!e.is_subscribed());
    assert_eq!(e.send_chunk(), Ok(ChunkSent::Idle));
}

#[test]
fn transport_error_on_send_is_reported() {
    let (e, tx) = linked(Duration::from_millis(200));
    e.prepare(&pour(2)).unwrap();
    tx.fail_next(TransportError::Busy);
    let err = e.send_start(300).unwrap_err();
    assert_eq!(err, TransferError::Transport(TransportError::Busy));
    assert!(err.is_transient());

    // Nothing went out; the next attempt does.
    e.send_start(300).unwrap();
    assert_eq!(tx.flags(), vec![0xAA]);
}

// ── Retries ──────────────────────────────────────────────────

#[test]
fn failed_acks_resend_then_abort() {
    let (e, tx) = linked(Duration::from_millis(200));
    e.prepare(&pour(10)).unwrap();
    e.send_start(300).unwrap();

    for attempt in 1..=MAX_INDICATION_RETRIES {
        e.on_indication_complete(Err(TransportError::Stack(-1)));
        assert_eq!(e.process_pending_retries(), 1, "attempt {}", attempt);
        assert!(e.is_sending());
    }
    let packets = tx.packets();
    assert_eq!(packets.len(), 1 + usize::from(MAX_INDICATION_RETRIES));
    assert!(packets.iter().all(|p| *p == packets[0]));

    e.on_indication_complete(Err(TransportError::Stack(-1)));
    assert_eq!(e.process_pending_retries(), 0);
    assert!(!e.is_sending());
    assert_eq!(e.send_chunk(), Ok(ChunkSent::Idle));
}

#[test]
fn successful_ack_resets_the_retry_budget() {
    let (e, tx) = linked(Duration::from_millis(200));
    e.prepare(&pour(10)).unwrap();
    e.send_start(300).unwrap();

    e.on_indication_complete(Err(TransportError::Busy));
    e.process_pending_retries();
    e.on_indication_complete(Ok(()));
    e.send_chunk().unwrap();

    for _ in 0..MAX_INDICATION_RETRIES {
        e.on_indication_complete(Err(TransportError::Busy));
        e.process_pending_retries();
    }
    assert!(e.is_sending());
    assert_eq!(tx.flags(), vec![0xAA, 0xAA, 0xBB, 0xBB, 0xBB, 0xBB]);
}

#[test]
fn retry_after_disconnect_is_dropped() {
    let (e, tx) = linked(Duration::from_millis(200));
    e.prepare(&pour(3)).unwrap();
    e.send_start(300).unwrap();

    e.on_indication_complete(Err(TransportError::Busy));
    e.on_disconnected(CONN);
    assert_eq!(e.process_pending_retries(), 1);
    assert_eq!(tx.flags(), vec![0xAA]);
}

// ── Link management ──────────────────────────────────────────

#[test]
fn second_connection_is_turned_away() {
    let (e, tx) = linked(Duration::from_millis(200));
    assert!(!e.on_connected(CONN + 1));
    assert_eq!(*tx.dropped.lock().unwrap(), vec![CONN + 1]);

    // Its disconnect does not tear down the real link.
    e.on_disconnected(CONN + 1);
    assert!(e.is_connected());

    // Reconnect of the same handle is fine.
    assert!(e.on_connected(CONN));
}

#[test]
fn disconnect_peer_drops_only_a_live_link() {
    let (e, tx) = engine(Duration::from_millis(200));
    e.disconnect_peer();
    assert!(tx.dropped.lock().unwrap().is_empty());

    assert!(e.on_connected(CONN));
    e.disconnect_peer();
    assert_eq!(*tx.dropped.lock().unwrap(), vec![CONN]);
}
