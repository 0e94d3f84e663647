//! FSM driver threads.
//!
//! Each machine gets one thread that calls [`StateMachine::step`] and then
//! sleeps for the period the active state chose:
//!
//! ```text
//!   loop {
//!       lock ─▶ on_run ─▶ (successor) ─▶ deferred request ─▶ unlock
//!       sleep(period)
//!   }
//! ```
//!
//! A failing `on_run` has already escalated the machine to its error state
//! by the time `step` returns; the loop then ends and the thread's result
//! is that error.  There is no self-healing.
//!
//! # ESP-IDF threading model
//!
//! ESP-IDF implements `std::thread` on pthreads over FreeRTOS tasks.
//! `esp_pthread_set_cfg()` configures priority and stack for the *next*
//! `pthread_create()` from the calling thread, so the config→spawn pair
//! must not be interleaved with other thread creation.

use super::{MachineContext, StateId, StateMachine};
use crate::error::FsmError;
use log::{error, info};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Thread parameters for one driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// Null-terminated thread name (e.g. `"fsm-main\0"`).
    pub name: &'static str,
    pub priority: u8,
    pub stack_kb: usize,
}

/// Drive `machine` until a run behaviour fails.  Returns the failure.
pub fn run<S: StateId, C: MachineContext>(machine: &StateMachine<S, C>) -> FsmError {
    loop {
        if let Err(e) = machine.step() {
            error!(
                "FSM[{}] halted in {} ({})",
                machine.name(),
                machine.current_state().name(),
                e
            );
            return e;
        }
        thread::sleep(machine.period());
    }
}

/// Spawn the driver thread for `machine`.
pub fn spawn<S, C>(
    machine: Arc<StateMachine<S, C>>,
    config: DriverConfig,
) -> io::Result<JoinHandle<FsmError>>
where
    S: StateId,
    C: MachineContext + 'static,
{
    configure_next_thread(&config)?;

    let display_name = config.name.trim_end_matches('\0');
    info!(
        "Spawning '{}' for FSM[{}] (pri={}, stack={}KB)",
        display_name,
        machine.name(),
        config.priority,
        config.stack_kb
    );

    thread::Builder::new()
        .name(display_name.into())
        .stack_size(config.stack_kb * 1024)
        .spawn(move || run(&machine))
}

#[cfg(target_os = "espidf")]
fn configure_next_thread(config: &DriverConfig) -> io::Result<()> {
    // SAFETY: plain FFI calls on a config struct we own; the name is a
    // 'static null-terminated string.
    let ret = unsafe {
        let mut cfg = esp_idf_svc::sys::esp_create_default_pthread_config();
        cfg.prio = i32::from(config.priority);
        cfg.stack_size = (config.stack_kb * 1024) as i32;
        cfg.thread_name = config.name.as_ptr().cast();
        esp_idf_svc::sys::esp_pthread_set_cfg(&cfg)
    };
    if ret == esp_idf_svc::sys::ESP_OK as i32 {
        Ok(())
    } else {
        Err(io::Error::other(format!("esp_pthread_set_cfg failed: {ret}")))
    }
}

/// Simulation: priorities are ignored, only the stack size applies.
#[cfg(not(target_os = "espidf"))]
fn configure_next_thread(_config: &DriverConfig) -> io::Result<()> {
    Ok(())
}
