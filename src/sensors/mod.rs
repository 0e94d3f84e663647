//! Sensor subsystem.
//!
//! The only sensor is the pour pulse counter; its interrupt fills a
//! [`PulseCapture`](pulse::PulseCapture) that the lifecycle machine reads.

pub mod pulse;
