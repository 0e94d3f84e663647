//! The generic kernel driven through a small three-state machine of its own,
//! independent of the device tables.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use trichter::error::{FsmError, Result};
use trichter::fsm::driver;
use trichter::fsm::{MachineContext, StateDescriptor, StateId, StateMachine, no_impl, stay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Valve {
    Closed = 0,
    Open = 1,
    Fault = 2,
}

impl StateId for Valve {
    const COUNT: usize = 3;
    const ERROR: Self = Self::Fault;

    fn index(self) -> usize {
        self as usize
    }

    fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::Closed),
            1 => Some(Self::Open),
            2 => Some(Self::Fault),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::Open => "Open",
            Self::Fault => "Fault",
        }
    }
}

#[derive(Default)]
struct ValveCtx {
    entries: Vec<Valve>,
    runs_open: u32,
    fail_after: Option<u32>,
    stuck: bool,
}

impl MachineContext for ValveCtx {
    fn period(&self) -> Duration {
        Duration::from_millis(1)
    }
}

fn closed_entry(ctx: &mut ValveCtx) -> Result<()> {
    ctx.entries.push(Valve::Closed);
    Ok(())
}

fn open_entry(ctx: &mut ValveCtx) -> Result<()> {
    ctx.entries.push(Valve::Open);
    Ok(())
}

fn open_run(ctx: &mut ValveCtx) -> Result<Option<Valve>> {
    ctx.runs_open += 1;
    match ctx.fail_after {
        Some(n) if ctx.runs_open >= n => Err(FsmError::ApiFailure),
        _ => Ok(None),
    }
}

fn open_exit(ctx: &mut ValveCtx) -> Result<()> {
    if ctx.stuck {
        return Err(FsmError::ApiFailure);
    }
    Ok(())
}

fn fault_entry(ctx: &mut ValveCtx) -> Result<()> {
    ctx.entries.push(Valve::Fault);
    Ok(())
}

static VALVE_TABLE: [StateDescriptor<Valve, ValveCtx>; Valve::COUNT] = [
    StateDescriptor {
        id: Valve::Closed,
        on_entry: closed_entry,
        on_run: stay,
        on_exit: no_impl,
        allowed: [Some(Valve::Open), Some(Valve::Fault), None, None, None],
    },
    StateDescriptor {
        id: Valve::Open,
        on_entry: open_entry,
        on_run: open_run,
        on_exit: open_exit,
        allowed: [Some(Valve::Closed), Some(Valve::Fault), None, None, None],
    },
    StateDescriptor {
        id: Valve::Fault,
        on_entry: fault_entry,
        on_run: stay,
        on_exit: no_impl,
        allowed: [Some(Valve::Fault), None, None, None, None],
    },
];

static SHUFFLED_TABLE: [StateDescriptor<Valve, ValveCtx>; Valve::COUNT] = [
    StateDescriptor {
        id: Valve::Open,
        on_entry: open_entry,
        on_run: open_run,
        on_exit: open_exit,
        allowed: [None; 5],
    },
    StateDescriptor {
        id: Valve::Closed,
        on_entry: closed_entry,
        on_run: stay,
        on_exit: no_impl,
        allowed: [None; 5],
    },
    StateDescriptor {
        id: Valve::Fault,
        on_entry: fault_entry,
        on_run: stay,
        on_exit: no_impl,
        allowed: [None; 5],
    },
];

fn valve(ctx: ValveCtx) -> (StateMachine<Valve, ValveCtx>, Arc<Mutex<Vec<Valve>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let machine = StateMachine::new("valve", &VALVE_TABLE, Valve::Closed, ctx)
        .unwrap()
        .with_notifier(move |s| sink.lock().unwrap().push(s));
    (machine, seen)
}

// ── Construction ─────────────────────────────────────────────

#[test]
fn misordered_table_is_rejected() {
    let result = StateMachine::new("bad", &SHUFFLED_TABLE, Valve::Closed, ValveCtx::default());
    assert!(matches!(result, Err(FsmError::InvalidParameter)));
}

#[test]
fn start_runs_initial_entry_and_notifies() {
    let (m, seen) = valve(ValveCtx::default());
    m.start().unwrap();
    assert_eq!(m.current_state(), Valve::Closed);
    assert_eq!(m.with_context(|c| c.entries.clone()), vec![Valve::Closed]);
    assert_eq!(*seen.lock().unwrap(), vec![Valve::Closed]);
}

// ── Transitions ──────────────────────────────────────────────

#[test]
fn deferred_request_applies_on_next_step() {
    let (m, seen) = valve(ValveCtx::default());
    m.start().unwrap();

    m.transition_deferred(Valve::Open).unwrap();
    assert!(m.has_pending_request());
    assert_eq!(m.current_state(), Valve::Closed);

    m.step().unwrap();
    assert!(!m.has_pending_request());
    assert_eq!(m.current_state(), Valve::Open);
    assert_eq!(*seen.lock().unwrap(), vec![Valve::Closed, Valve::Open]);
}

#[test]
fn cancelled_deferred_request_never_applies() {
    let (m, _) = valve(ValveCtx::default());
    m.start().unwrap();
    m.transition_deferred(Valve::Open).unwrap();
    m.cancel_deferred();
    m.step().unwrap();
    assert_eq!(m.current_state(), Valve::Closed);
}

#[test]
fn forbidden_transition_changes_nothing() {
    let (m, seen) = valve(ValveCtx::default());
    m.start().unwrap();
    m.transition(Valve::Open).unwrap();

    // Open → Open is not listed.
    assert_eq!(m.request(Valve::Open), Err(FsmError::TransitionForbidden));
    assert_eq!(m.current_state(), Valve::Open);
    assert_eq!(m.last_error(), None);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn exit_failure_keeps_state_on_plain_transition() {
    let (m, _) = valve(ValveCtx {
        stuck: true,
        ..Default::default()
    });
    m.start().unwrap();
    m.transition(Valve::Open).unwrap();

    assert_eq!(m.transition(Valve::Closed), Err(FsmError::ApiFailure));
    assert_eq!(m.current_state(), Valve::Open);
    assert_eq!(m.last_error(), None);
}

#[test]
fn exit_failure_escalates_on_request() {
    let (m, _) = valve(ValveCtx {
        stuck: true,
        ..Default::default()
    });
    m.start().unwrap();
    m.transition(Valve::Open).unwrap();
    m.transition_deferred(Valve::Closed).unwrap();

    assert_eq!(m.request(Valve::Closed), Err(FsmError::ApiFailure));
    assert_eq!(m.current_state(), Valve::Fault);
    assert_eq!(m.last_error(), Some(FsmError::ApiFailure));
    assert!(!m.has_pending_request());
}

// ── Driver ───────────────────────────────────────────────────

#[test]
fn driver_stops_on_run_failure_in_error_state() {
    let (m, seen) = valve(ValveCtx {
        fail_after: Some(3),
        ..Default::default()
    });
    m.start().unwrap();
    m.transition_deferred(Valve::Open).unwrap();

    let halted = driver::run(&m);

    assert_eq!(halted, FsmError::ApiFailure);
    assert_eq!(m.current_state(), Valve::Fault);
    assert_eq!(m.last_error(), Some(FsmError::ApiFailure));
    assert_eq!(m.with_context(|c| c.runs_open), 3);
    assert_eq!(seen.lock().unwrap().last(), Some(&Valve::Fault));

    // Terminal: deferred requests are refused from here on.
    assert_eq!(
        m.transition_deferred(Valve::Closed),
        Err(FsmError::TransitionForbidden)
    );
}

#[test]
fn spawned_driver_returns_the_failure() {
    let (m, _) = valve(ValveCtx {
        fail_after: Some(1),
        ..Default::default()
    });
    let m = Arc::new(m);
    m.start().unwrap();
    m.transition_deferred(Valve::Open).unwrap();

    let handle = driver::spawn(
        Arc::clone(&m),
        driver::DriverConfig {
            name: "valve\0",
            priority: 1,
            stack_kb: 16,
        },
    )
    .unwrap();

    assert_eq!(handle.join().unwrap(), FsmError::ApiFailure);
    assert_eq!(m.current_state(), Valve::Fault);
}
