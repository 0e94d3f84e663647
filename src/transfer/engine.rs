//! Chunked transfer protocol engine.
//!
//! Drives one [`BulkDataSession`] over an [`IndicationTransport`] with
//! exactly one acknowledged send outstanding:
//!
//! ```text
//!   prepare ─▶ send_start ─▶ send_chunk … send_chunk ─▶ send_chunk (END)
//!                  │             ▲   │          ▲
//!                  ▼             │   ▼          │
//!               [ack] ──give──▶ ready semaphore (5 s wait)
//! ```
//!
//! Every path that could strand a waiter releases the semaphore:
//! transport errors, retries exhausted, disconnect and the peer disabling
//! indications.  Waiters re-check the link and the active flag after
//! waking, so a release caused by cancellation never leads to a stale send.

use super::packet::{
    self, ATT_RESERVE, DEFAULT_SDU_SIZE, HEADER_LEN, MAX_SDU_SIZE, PacketBuf,
};
use super::retry::{RetryJob, RetryQueue};
use super::semaphore::BinarySemaphore;
use super::session::BulkDataSession;
use super::transport::{ConnHandle, IndicationTransport};
use crate::error::{TransferError, TransportError};
use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use log::{debug, error, info, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Resends allowed per packet before the session is aborted.
pub const MAX_INDICATION_RETRIES: u8 = 3;

/// What a successful [`TransferEngine::send_chunk`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSent {
    /// A DATA packet with `len` payload bytes went out.
    Data { chunk_index: u16, len: usize },
    /// The END packet went out; the session is over.
    End,
    /// No transfer is active.  Nothing was sent.
    Idle,
}

struct RetryContext {
    last: PacketBuf,
    conn: ConnHandle,
    count: u8,
}

pub struct TransferEngine {
    transport: Box<dyn IndicationTransport>,
    session: Mutex<BulkDataSession>,
    retry: Mutex<RetryContext>,
    retry_queue: RetryQueue,
    ready: BinarySemaphore,
    active: AtomicBool,
    connected: AtomicBool,
    conn: AtomicU16,
    subscribed: AtomicBool,
    sdu_size: AtomicU16,
    ack_timeout: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TransferEngine {
    pub fn new(transport: Box<dyn IndicationTransport>, ack_timeout: Duration) -> Self {
        Self {
            transport,
            session: Mutex::new(BulkDataSession::new()),
            retry: Mutex::new(RetryContext {
                last: PacketBuf::new(),
                conn: 0,
                count: 0,
            }),
            retry_queue: RetryQueue::new(),
            ready: BinarySemaphore::new(true),
            active: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            conn: AtomicU16::new(0),
            subscribed: AtomicBool::new(false),
            sdu_size: AtomicU16::new(DEFAULT_SDU_SIZE),
            ack_timeout,
        }
    }

    // ── Queries ──────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// `true` while a transfer is in flight.
    pub fn is_sending(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    pub fn sdu_size(&self) -> u16 {
        self.sdu_size.load(Ordering::Acquire)
    }

    pub fn cursor(&self) -> usize {
        lock(&self.session).cursor()
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.retry_queue
    }

    fn connection(&self) -> Option<ConnHandle> {
        self.is_connected()
            .then(|| self.conn.load(Ordering::Acquire))
    }

    // ── Producer side ────────────────────────────────────────

    /// Load a finished pour and mark the session active.
    pub fn prepare(&self, timestamps: &[u32]) -> Result<(), TransferError> {
        lock(&self.session).load(timestamps)?;
        self.active.store(true, Ordering::Release);
        info!("XFER: prepared {} timestamps", timestamps.len());
        Ok(())
    }

    /// Send START: element count and the calibration constant.
    pub fn send_start(&self, calibration: u16) -> Result<(), TransferError> {
        let conn = self.connection().ok_or(TransferError::NotConnected)?;
        if !self.is_sending() {
            return Err(TransferError::Cancelled);
        }
        let count = lock(&self.session).count();
        let packet = packet::encode_start(count, calibration, self.sdu_size());
        self.ready.reset();
        self.send(conn, packet)?;
        info!(
            "XFER: START count={} calibration={} sdu={}",
            count,
            calibration,
            self.sdu_size()
        );
        Ok(())
    }

    /// Send the next DATA chunk, or END once the buffer is exhausted.
    ///
    /// Blocks up to the ack timeout for the previous send's acknowledgment.
    /// `Timeout` leaves the cursor untouched, so the call can simply be
    /// repeated.
    pub fn send_chunk(&self) -> Result<ChunkSent, TransferError> {
        if !self.is_sending() {
            return Ok(ChunkSent::Idle);
        }
        if !self.ready.take(self.ack_timeout) {
            warn!("XFER: no acknowledgment within {:?}", self.ack_timeout);
            return Err(TransferError::Timeout);
        }

        // The link may have changed while we waited.
        let Some(conn) = self.connection() else {
            self.ready.give();
            return Err(TransferError::NotConnected);
        };
        if !self.is_sending() {
            self.ready.give();
            return Err(TransferError::Cancelled);
        }

        let sdu = self.sdu_size();
        let (packet, sent) = {
            let session = lock(&self.session);
            match session.next_chunk(sdu) {
                Some((chunk_index, payload)) => (
                    packet::encode_data(chunk_index, payload),
                    ChunkSent::Data {
                        chunk_index,
                        len: payload.len(),
                    },
                ),
                None => (packet::encode_end(), ChunkSent::End),
            }
        };

        self.send(conn, packet)?;

        match sent {
            ChunkSent::Data { chunk_index, len } => {
                let mut session = lock(&self.session);
                session.advance(len);
                debug!(
                    "XFER: DATA #{} {}B ({}/{})",
                    chunk_index,
                    len,
                    session.cursor(),
                    session.total_bytes()
                );
            }
            ChunkSent::End => {
                self.active.store(false, Ordering::Release);
                info!("XFER: END, session complete");
            }
            ChunkSent::Idle => {}
        }
        Ok(sent)
    }

    fn send(&self, conn: ConnHandle, packet: PacketBuf) -> Result<(), TransferError> {
        {
            let mut retry = lock(&self.retry);
            retry.last.clone_from(&packet);
            retry.conn = conn;
            retry.count = 0;
        }
        self.transport.indicate(conn, &packet).map_err(|e| {
            warn!("XFER: indicate failed: {}", e);
            self.ready.give();
            TransferError::from(e)
        })
    }

    // ── Radio stack callbacks ────────────────────────────────

    /// Acknowledgment of the last indication.
    pub fn on_indication_complete(&self, result: Result<(), TransportError>) {
        match result {
            Ok(()) => {
                lock(&self.retry).count = 0;
                self.ready.give();
            }
            Err(e) if !self.is_sending() => {
                debug!("XFER: late indication failure ({}) ignored, no session", e);
                lock(&self.retry).count = 0;
            }
            Err(e) => {
                let attempt = {
                    let mut retry = lock(&self.retry);
                    if retry.count < MAX_INDICATION_RETRIES {
                        retry.count += 1;
                        Some(retry.count)
                    } else {
                        retry.count = 0;
                        None
                    }
                };
                match attempt {
                    Some(attempt) => {
                        warn!(
                            "XFER: indication failed ({}), retry {}/{}",
                            e, attempt, MAX_INDICATION_RETRIES
                        );
                        if self.retry_queue.try_send(RetryJob { attempt }).is_err() {
                            error!("XFER: retry queue full, aborting session");
                            self.abort();
                        }
                    }
                    None => {
                        error!(
                            "XFER: indication failed after {} retries, aborting session",
                            MAX_INDICATION_RETRIES
                        );
                        self.abort();
                    }
                }
            }
        }
    }

    /// Peer connected.  Returns `false` if the connection was rejected
    /// because another peer already holds the link.
    pub fn on_connected(&self, conn: ConnHandle) -> bool {
        if self.is_connected() && self.conn.load(Ordering::Acquire) != conn {
            warn!("BLE: rejecting second connection {}", conn);
            self.transport.disconnect(conn);
            return false;
        }
        self.conn.store(conn, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        info!("BLE: connected (conn={})", conn);
        true
    }

    /// Peer gone: cancel the transfer and wake any waiter.
    pub fn on_disconnected(&self, conn: ConnHandle) {
        if self.is_connected() && self.conn.load(Ordering::Acquire) != conn {
            debug!("BLE: ignoring disconnect of rejected connection {}", conn);
            return;
        }
        self.connected.store(false, Ordering::Release);
        self.subscribed.store(false, Ordering::Release);
        self.sdu_size.store(DEFAULT_SDU_SIZE, Ordering::Release);
        lock(&self.retry).count = 0;
        if self.is_sending() {
            warn!("XFER: disconnected mid-transfer (cursor={})", self.cursor());
        }
        self.abort();
        info!("BLE: disconnected (conn={})", conn);
    }

    /// The peer changed the indication subscription.  Disabling it is the
    /// peer's cancellation signal.
    pub fn on_subscription_changed(&self, enabled: bool) {
        self.subscribed.store(enabled, Ordering::Release);
        if enabled {
            info!("BLE: indications enabled");
        } else {
            if self.is_sending() {
                warn!("XFER: peer disabled indications, cancelling transfer");
            }
            self.abort();
        }
    }

    /// MTU exchange finished.  Returns the new chunk size.
    pub fn on_mtu_updated(&self, tx_mtu: u16, rx_mtu: u16) -> u16 {
        let sdu = tx_mtu
            .min(rx_mtu)
            .saturating_sub(HEADER_LEN as u16 + ATT_RESERVE)
            .clamp(DEFAULT_SDU_SIZE, MAX_SDU_SIZE);
        self.sdu_size.store(sdu, Ordering::Release);
        info!("BLE: MTU tx={} rx={} -> sdu={}", tx_mtu, rx_mtu, sdu);
        sdu
    }

    /// Abandon the current session, if any, and release a blocked sender.
    /// The link stays up.
    pub fn cancel(&self) {
        if self.is_sending() {
            warn!("XFER: session cancelled (cursor={})", self.cursor());
        }
        lock(&self.retry).count = 0;
        self.abort();
    }

    /// Drop the current peer, if any.
    pub fn disconnect_peer(&self) {
        if let Some(conn) = self.connection() {
            info!("BLE: dropping connection {}", conn);
            self.transport.disconnect(conn);
        }
    }

    // ── Retry worker ─────────────────────────────────────────

    /// Replay the last packet.  Runs on the retry worker, never inside the
    /// radio stack's callback.
    pub fn resend_last(&self, job: RetryJob) {
        let Some(conn) = self.connection() else {
            debug!("XFER: retry {} dropped, link gone", job.attempt);
            return;
        };
        if !self.is_sending() {
            debug!("XFER: retry {} dropped, session over", job.attempt);
            return;
        }
        let packet = lock(&self.retry).last.clone();
        info!("XFER: resending {}B (attempt {})", packet.len(), job.attempt);
        if let Err(e) = self.transport.indicate(conn, &packet) {
            self.on_indication_complete(Err(e));
        }
    }

    /// Run every queued retry inline.  Returns how many ran.
    pub fn process_pending_retries(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.retry_queue.try_receive() {
            self.resend_last(job);
            ran += 1;
        }
        ran
    }

    fn abort(&self) {
        self.active.store(false, Ordering::Release);
        self.ready.give();
    }
}
