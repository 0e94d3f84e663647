//! Retry work queue.
//!
//! A failed acknowledgment arrives inside the radio stack's own callback.
//! Resending from there would recurse into the stack, so the callback only
//! posts a [`RetryJob`] and a low-priority worker thread does the resend.
//!
//! ```text
//! ┌──────────────────┐  RetryJob   ┌──────────────────┐
//! │ stack callback   │────────────▶│  retry worker    │
//! │ (ack failed)     │  Channel<4> │  resend_last()   │
//! └──────────────────┘             └──────────────────┘
//! ```

use super::TransferEngine;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::info;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Channel depth.  At most one packet is in flight, so one job is ever
/// pending in practice.
pub const RETRY_QUEUE_DEPTH: usize = 4;

/// Resend the last packet.  `attempt` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryJob {
    pub attempt: u8,
}

pub type RetryQueue = Channel<CriticalSectionRawMutex, RetryJob, RETRY_QUEUE_DEPTH>;

/// Spawn the worker that drains `engine`'s retry queue forever.
pub fn spawn_worker(engine: Arc<TransferEngine>, stack_kb: usize) -> io::Result<JoinHandle<()>> {
    info!("Spawning 'xfer-retry' (stack={}KB)", stack_kb);
    thread::Builder::new()
        .name("xfer-retry".into())
        .stack_size(stack_kb * 1024)
        .spawn(move || {
            loop {
                let job = futures_lite::future::block_on(engine.retry_queue().receive());
                engine.resend_last(job);
            }
        })
}
