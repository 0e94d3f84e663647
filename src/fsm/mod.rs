//! Table-driven finite state machine kernel.
//!
//! Classic embedded FSM pattern, generic over the state identity and the
//! context the behaviours mutate:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  &'static [StateDescriptor<S, C>]                                │
//! │  ┌──────────┬───────────┬──────────────────────┬──────────┬─────┐│
//! │  │ id       │ on_entry  │ on_run               │ on_exit  │ ->  ││
//! │  ├──────────┼───────────┼──────────────────────┼──────────┼─────┤│
//! │  │ S::A     │ fn(&mut C)│ fn(&mut C)->Option<S>│ fn(&mut C)│[..5]││
//! │  │ ...      │           │                      │          │     ││
//! │  │ S::ERROR │           │                      │          │     ││
//! │  └──────────┴───────────┴──────────────────────┴──────────┴─────┘│
//! └──────────────────────────────────────────────────────────────────┘
//!          ▲                           ▲
//!          │ transition() / request()  │ transition_deferred()
//!      thread context            interrupt / callback context
//!      (takes the lock)          (atomic mailbox, never blocks)
//! ```
//!
//! Two machines are built on this kernel: the device lifecycle
//! ([`states`]) and the advertising policy ([`advertising`]).  Each is
//! owned by an [`Arc`](std::sync::Arc) and stepped by its own
//! [`driver`] thread.
//!
//! A transition runs exit, swap and entry under the machine's lock, so the
//! state-change notifier only ever observes post-transition state.

pub mod advertising;
pub mod context;
pub mod driver;
pub mod states;
pub mod timer;

use crate::error::{FsmError, Result};
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::{debug, error, info, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Capacity of every state's allowed-transition set.
pub const MAX_TRANSITIONS: usize = 5;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Closed set of state identities for one machine.
///
/// `index()` must be dense (`0..COUNT`) and match the position of the
/// state's descriptor in the table.
pub trait StateId: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Number of states, and therefore the table length.
    const COUNT: usize;
    /// The terminal error state escalations jump to.
    const ERROR: Self;

    fn index(self) -> usize;
    fn from_index(idx: usize) -> Option<Self>;
    fn name(self) -> &'static str;
}

/// Per-machine context threaded through every behaviour.
pub trait MachineContext: Send {
    /// How long the driver sleeps between two `on_run` calls.
    fn period(&self) -> Duration;
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_entry` and `on_exit`.
pub type StateActionFn<C> = fn(&mut C) -> Result<()>;

/// Signature for the periodic `on_run` behaviour.
/// `Ok(Some(next))` requests a transition under the same lock.
pub type StateRunFn<S, C> = fn(&mut C) -> Result<Option<S>>;

/// Slot filler for states without an entry or exit hook.
pub fn no_impl<C>(_: &mut C) -> Result<()> {
    Err(FsmError::NoImplementation)
}

/// `on_run` filler for states that only wait.
pub fn stay<S, C>(_: &mut C) -> Result<Option<S>> {
    Ok(None)
}

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Static descriptor for a single state.
pub struct StateDescriptor<S, C> {
    pub id: S,
    pub on_entry: StateActionFn<C>,
    pub on_run: StateRunFn<S, C>,
    pub on_exit: StateActionFn<C>,
    /// Permitted successors; `None` is the "no state" sentinel.
    pub allowed: [Option<S>; MAX_TRANSITIONS],
}

impl<S: StateId, C> StateDescriptor<S, C> {
    /// `true` iff `target` is literally listed in this state's allowed set.
    pub fn is_allowed(&self, target: S) -> bool {
        self.allowed.iter().any(|slot| *slot == Some(target))
    }
}

/// Free-function form of [`StateDescriptor::is_allowed`].
pub fn is_allowed<S: StateId, C>(current: &StateDescriptor<S, C>, target: S) -> bool {
    current.is_allowed(target)
}

// ---------------------------------------------------------------------------
// Deferred transition mailbox
// ---------------------------------------------------------------------------

const NO_REQUEST: usize = usize::MAX;

/// Single-slot lock-free mailbox holding a pending target index.
struct DeferredSlot(AtomicUsize);

impl DeferredSlot {
    const fn new() -> Self {
        Self(AtomicUsize::new(NO_REQUEST))
    }

    fn post(&self, idx: usize) {
        self.0.store(idx, Ordering::Release);
    }

    /// Take the pending request, leaving the slot empty.  A request posted
    /// after the swap stays in the slot for the next cycle.
    fn take(&self) -> Option<usize> {
        match self.0.swap(NO_REQUEST, Ordering::AcqRel) {
            NO_REQUEST => None,
            idx => Some(idx),
        }
    }

    fn clear(&self) {
        self.0.store(NO_REQUEST, Ordering::Release);
    }

    fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire) != NO_REQUEST
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Callback invoked after every successful entry of a notifying machine.
pub type Notifier<S> = Box<dyn Fn(S) + Send + Sync>;

struct Core<C> {
    current: usize,
    error: Option<FsmError>,
    ctx: C,
}

/// One independent state machine: table, lock-protected core and mailbox.
pub struct StateMachine<S: StateId, C: 'static> {
    name: &'static str,
    table: &'static [StateDescriptor<S, C>],
    core: Mutex<Core<C>>,
    /// Lock-free mirror of `core.current`, written only under the lock.
    current: AtomicUsize,
    deferred: DeferredSlot,
    notifier: Option<Notifier<S>>,
}

impl<S: StateId, C: MachineContext> StateMachine<S, C> {
    /// Build a machine over `table`, positioned at `initial`.
    ///
    /// Rejects a table whose length differs from `S::COUNT` or whose rows
    /// are not ordered by `S::index()`.
    pub fn new(
        name: &'static str,
        table: &'static [StateDescriptor<S, C>],
        initial: S,
        ctx: C,
    ) -> Result<Self> {
        if table.len() != S::COUNT {
            error!(
                "FSM[{}]: table has {} rows, expected {}",
                name,
                table.len(),
                S::COUNT
            );
            return Err(FsmError::InvalidParameter);
        }
        if let Some((idx, row)) = table
            .iter()
            .enumerate()
            .find(|(idx, row)| row.id.index() != *idx)
        {
            error!("FSM[{}]: row {} holds {:?}", name, idx, row.id);
            return Err(FsmError::InvalidParameter);
        }
        let current = initial.index();
        if current >= table.len() {
            return Err(FsmError::InvalidParameter);
        }
        Ok(Self {
            name,
            table,
            core: Mutex::new(Core {
                current,
                error: None,
                ctx,
            }),
            current: AtomicUsize::new(current),
            deferred: DeferredSlot::new(),
            notifier: None,
        })
    }

    /// Register the state-change callback.  It runs with the machine's lock
    /// held and must not call back into this machine.
    #[must_use]
    pub fn with_notifier(mut self, notifier: impl Fn(S) + Send + Sync + 'static) -> Self {
        self.notifier = Some(Box::new(notifier));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the initial state's entry.  Call once before the first `step()`.
    pub fn start(&self) -> Result<()> {
        let mut core = self.lock();
        let state = self.table[core.current].id;
        info!("FSM[{}] starting in state: {}", self.name, state.name());
        self.enter(&mut core, state)
    }

    /// The current state, read without taking the lock.
    pub fn current_state(&self) -> S {
        S::from_index(self.current.load(Ordering::Acquire)).unwrap_or(S::ERROR)
    }

    /// Sticky error code of the last escalation, if any.
    pub fn last_error(&self) -> Option<FsmError> {
        self.lock().error
    }

    /// Whether a deferred request is waiting for the driver.
    pub fn has_pending_request(&self) -> bool {
        self.deferred.is_pending()
    }

    /// Current driver period, as chosen by the active state.
    pub fn period(&self) -> Duration {
        self.lock().ctx.period()
    }

    /// Run `f` against the context under the machine's lock.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.lock().ctx)
    }

    /// Validate and apply a transition to `target`.
    ///
    /// `TransitionForbidden` leaves everything untouched.  An exit failure
    /// other than `NoImplementation` aborts before the swap and is returned
    /// as is; an entry failure is returned after the swap.
    pub fn transition(&self, target: S) -> Result<()> {
        let mut core = self.lock();
        self.transition_locked(&mut core, target)
    }

    /// [`transition`](Self::transition) plus escalation: any failure other
    /// than `TransitionForbidden` forces the machine into its error state and
    /// discards a pending deferred request.
    pub fn request(&self, target: S) -> Result<()> {
        let mut core = self.lock();
        self.apply(&mut core, target)
    }

    /// Record `target` for the driver to apply on its next cycle.
    ///
    /// Never blocks, so it is safe from interrupt and radio-stack callback
    /// context.  Rejected while the machine sits in its error state.
    pub fn transition_deferred(&self, target: S) -> Result<()> {
        if self.current.load(Ordering::Acquire) == S::ERROR.index() {
            return Err(FsmError::TransitionForbidden);
        }
        let idx = target.index();
        if idx >= self.table.len() {
            return Err(FsmError::InvalidParameter);
        }
        self.deferred.post(idx);
        Ok(())
    }

    /// Discard a pending deferred request, if any.
    pub fn cancel_deferred(&self) {
        self.deferred.clear();
    }

    /// One driver cycle: run the current state, then apply a pending
    /// deferred request.
    ///
    /// A failing `on_run` escalates to the error state, drops any pending
    /// request and returns the failure; the driver stops on it.
    pub fn step(&self) -> Result<()> {
        let mut core = self.lock();
        let state = self.table[core.current].id;

        match (self.table[core.current].on_run)(&mut core.ctx) {
            Ok(Some(next)) => {
                let _ = self.apply(&mut core, next);
            }
            Ok(None) => {}
            Err(e) if e.is_benign() => {}
            Err(e) => {
                error!("FSM[{}] run failed in {}: {}", self.name, state.name(), e);
                self.escalate(&mut core, e);
                return Err(e);
            }
        }

        if let Some(idx) = self.deferred.take() {
            match S::from_index(idx) {
                Some(target) => {
                    let _ = self.apply(&mut core, target);
                }
                None => warn!("FSM[{}] dropped deferred request {}", self.name, idx),
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Core<C>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, core: &mut Core<C>, target: S) -> Result<()> {
        match self.transition_locked(core, target) {
            Ok(()) => Ok(()),
            Err(FsmError::TransitionForbidden) => {
                debug!(
                    "FSM[{}] {} -> {} forbidden",
                    self.name,
                    self.table[core.current].id.name(),
                    target.name()
                );
                Err(FsmError::TransitionForbidden)
            }
            Err(e) => {
                self.escalate(core, e);
                Err(e)
            }
        }
    }

    fn transition_locked(&self, core: &mut Core<C>, target: S) -> Result<()> {
        let idx = target.index();
        if idx >= self.table.len() {
            return Err(FsmError::InvalidParameter);
        }
        let from = &self.table[core.current];
        if !from.is_allowed(target) {
            return Err(FsmError::TransitionForbidden);
        }

        match (from.on_exit)(&mut core.ctx) {
            Ok(()) => {}
            Err(FsmError::NoImplementation) => {
                debug!("FSM[{}] {} has no exit hook", self.name, from.id.name());
            }
            Err(e) => {
                warn!(
                    "FSM[{}] exit of {} failed ({}), staying",
                    self.name,
                    from.id.name(),
                    e
                );
                return Err(e);
            }
        }

        info!(
            "FSM[{}] transition: {} -> {}",
            self.name,
            from.id.name(),
            target.name()
        );
        self.swap(core, idx);
        self.enter(core, target)
    }

    fn swap(&self, core: &mut Core<C>, idx: usize) {
        core.current = idx;
        self.current.store(idx, Ordering::Release);
    }

    fn enter(&self, core: &mut Core<C>, state: S) -> Result<()> {
        match (self.table[state.index()].on_entry)(&mut core.ctx) {
            Ok(()) | Err(FsmError::NoImplementation) => {
                if let Some(notify) = &self.notifier {
                    notify(state);
                }
                Ok(())
            }
            Err(e) => {
                warn!("FSM[{}] entry of {} failed: {}", self.name, state.name(), e);
                Err(e)
            }
        }
    }

    /// Force the error state, bypassing the allowed set.
    fn escalate(&self, core: &mut Core<C>, cause: FsmError) {
        core.error = Some(cause);
        self.deferred.clear();

        let error_idx = S::ERROR.index();
        if core.current == error_idx {
            return;
        }
        let from = self.table[core.current].id;
        if let Err(e) = (self.table[core.current].on_exit)(&mut core.ctx) {
            if !e.is_benign() {
                warn!("FSM[{}] exit of {} failed during escalation: {}", self.name, from.name(), e);
            }
        }
        warn!(
            "FSM[{}] escalating {} -> {} ({})",
            self.name,
            from.name(),
            S::ERROR.name(),
            cause
        );
        self.swap(core, error_idx);
        let _ = self.enter(core, S::ERROR);
    }
}
