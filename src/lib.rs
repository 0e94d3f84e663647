//! Trichter firmware library.
//!
//! Exposes the state machines, the transfer engine and the port adapters
//! for integration testing and host tooling.  All ESP-IDF-specific code is
//! guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod fsm;
pub mod pins;
pub mod sensors;
pub mod transfer;
