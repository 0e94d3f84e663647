//! Pour pulse capture buffer.
//!
//! The flow sensor emits one edge per fixed volume of liquid.  The edge
//! interrupt latches the capture timer and appends the tick value here.
//! Every slot is an atomic so the interrupt writes and the lifecycle
//! machine reads without a lock; the lifecycle machine never writes
//! timestamps.
//!
//! ```text
//!   edge ISR ──record(ticks)──▶ [t0 t1 t2 … t299]   write_idx
//!                                      ▲                 │
//!   lifecycle FSM ──latest()/snapshot()┘◀────len()───────┘
//! ```
//!
//! `write_idx` keeps counting past the buffer capacity so a calibration
//! run can count more pulses than it can store.  `last_tick` follows every
//! pulse, stored or not, so the end-of-pour gap is measured from the pulse
//! that really came last.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Timestamp capacity, and the largest pour the device can transfer.
pub const MAX_TIMESTAMPS: usize = 300;

/// Lock-free, bounded buffer of pulse timestamps.
pub struct PulseCapture {
    stamps: [AtomicU32; MAX_TIMESTAMPS],
    write_idx: AtomicU32,
    last_tick: AtomicU32,
    running: AtomicBool,
}

impl Default for PulseCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseCapture {
    pub const fn new() -> Self {
        Self {
            stamps: [const { AtomicU32::new(0) }; MAX_TIMESTAMPS],
            write_idx: AtomicU32::new(0),
            last_tick: AtomicU32::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Append one timestamp.  Called from the edge interrupt.
    ///
    /// Returns `true` if this pulse opened a new burst.
    pub fn record(&self, ticks: u32) -> bool {
        let first = !self.running.swap(true, Ordering::AcqRel);
        self.last_tick.store(ticks, Ordering::Release);
        let idx = self.write_idx.fetch_add(1, Ordering::AcqRel) as usize;
        if let Some(slot) = self.stamps.get(idx) {
            slot.store(ticks, Ordering::Release);
        }
        first
    }

    /// Pulses seen since the last reset, including any past capacity.
    pub fn pulse_count(&self) -> u32 {
        self.write_idx.load(Ordering::Acquire)
    }

    /// Number of stored timestamps.
    pub fn len(&self) -> usize {
        (self.pulse_count() as usize).min(MAX_TIMESTAMPS)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn first(&self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        Some(self.stamps[0].load(Ordering::Acquire))
    }

    /// Tick of the most recent pulse, including pulses past capacity.
    pub fn latest(&self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        Some(self.last_tick.load(Ordering::Acquire))
    }

    /// Copy the stored timestamps into `out`; returns how many were copied.
    pub fn snapshot(&self, out: &mut [u32]) -> usize {
        let n = self.len().min(out.len());
        for (dst, src) in out.iter_mut().zip(&self.stamps[..n]) {
            *dst = src.load(Ordering::Acquire);
        }
        n
    }

    /// Close the current burst, keeping its timestamps.  The next pulse
    /// opens a new one.
    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Forget the current burst.  The next pulse opens a new one.
    pub fn reset(&self) {
        self.write_idx.store(0, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }
}
