//! Application core: everything between the state machines and the
//! adapters.
//!
//! Inputs from interrupts, buttons and the radio stack are routed into the
//! machines here ([`inputs`], [`link`]); [`service`] wires the machines,
//! the transfer engine and the driver threads together.  All hardware is
//! reached through the **port traits** in [`ports`], so the whole layer
//! runs on the host against mocks.

pub mod commands;
pub mod events;
pub mod inputs;
pub mod link;
pub mod ports;
pub mod service;
