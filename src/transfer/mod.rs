//! Reliable chunked bulk transfer over BLE indications.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Transfer Stack                          │
//! │                                                            │
//! │  ┌──────────┐   ┌──────────┐   ┌─────────────────────────┐ │
//! │  │ Session  │──▶│  Packet  │──▶│  Engine (one in flight) │ │
//! │  │ (buffer) │   │ (framing)│   │  semaphore · retries    │ │
//! │  └──────────┘   └──────────┘   └─────────────────────────┘ │
//! │                                     │            ▲         │
//! │                                     ▼            │ acks    │
//! │                              ┌──────────────────────┐      │
//! │                              │ IndicationTransport  │      │
//! │                              └──────────────────────┘      │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod packet;
pub mod reassembly;
pub mod retry;
pub mod semaphore;
pub mod session;
pub mod transport;

pub use engine::{ChunkSent, MAX_INDICATION_RETRIES, TransferEngine};
pub use transport::{ConnHandle, IndicationTransport};
