//! Pure transition table for the write coalescer.
//!
//! No timers and no I/O live here. Each operation applies one event to the
//! context and returns the side effect the runtime must perform, which keeps
//! every transition testable without a scheduler.

use crate::guard::WriteGuard;
use std::fmt;

/// Sub-phase of an in-flight flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushState {
    /// No write arrived since the snapshot was taken.
    Clean,
    /// A newer value arrived while the flush was running.
    Dirty,
}

/// Coalescer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Debounce,
    Flushing(FlushState),
}

impl Phase {
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    pub const fn is_flushing(self) -> bool {
        matches!(self, Self::Flushing(_))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("IDLE"),
            Self::Debounce => f.write_str("DEBOUNCE"),
            Self::Flushing(FlushState::Clean) => f.write_str("FLUSHING.CLEAN"),
            Self::Flushing(FlushState::Dirty) => f.write_str("FLUSHING.DIRTY"),
        }
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect<T> {
    /// (Re)start the debounce timer.
    ArmDebounce,
    /// Start the flush operation against this snapshot.
    StartFlush(T),
    /// The coalescer just reached `IDLE`; notify the owner.
    Drained,
}

/// Observable state of one coalescer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescerSnapshot<T> {
    pub phase: Phase,
    pub latest_contents: T,
    pub dirty: bool,
    pub error: Option<String>,
}

/// Context plus phase of one write coalescer.
///
/// # Examples
///
/// ```
/// use docsync_core::coalescer::{CoalescerMachine, Effect, Phase};
/// use docsync_core::guard::AcceptAll;
///
/// let mut machine = CoalescerMachine::new("contents".to_string());
/// assert_eq!(machine.write("new".into(), &AcceptAll), Some(Effect::ArmDebounce));
/// assert_eq!(machine.phase(), Phase::Debounce);
///
/// let effect = machine.debounce_elapsed();
/// assert_eq!(effect, Some(Effect::StartFlush("new".to_string())));
///
/// assert_eq!(machine.flush_succeeded(), Some(Effect::Drained));
/// assert_eq!(machine.phase(), Phase::Idle);
/// ```
#[derive(Debug, Clone)]
pub struct CoalescerMachine<T> {
    phase: Phase,
    latest_contents: T,
    dirty: bool,
    error: Option<String>,
}

impl<T: Clone> CoalescerMachine<T> {
    /// Creates a machine in `IDLE`, seeded with already-persisted contents.
    pub fn new(initial: T) -> Self {
        Self {
            phase: Phase::Idle,
            latest_contents: initial,
            dirty: false,
            error: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn latest_contents(&self) -> &T {
        &self.latest_contents
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn snapshot(&self) -> CoalescerSnapshot<T> {
        CoalescerSnapshot {
            phase: self.phase,
            latest_contents: self.latest_contents.clone(),
            dirty: self.dirty,
            error: self.error.clone(),
        }
    }

    /// Applies `WRITE(value)`.
    ///
    /// Returns `None` when the guard rejects the value (no transition) and
    /// while a flush is running, since the in-flight flush keeps its own
    /// snapshot and the debounce is re-armed only once it completes.
    pub fn write<G>(&mut self, value: T, guard: &G) -> Option<Effect<T>>
    where
        G: WriteGuard<T> + ?Sized,
    {
        if !guard.should_write(&self.latest_contents, &value) {
            return None;
        }

        self.latest_contents = value;
        self.dirty = true;

        match self.phase {
            Phase::Idle | Phase::Debounce => {
                self.phase = Phase::Debounce;
                Some(Effect::ArmDebounce)
            }
            Phase::Flushing(_) => {
                self.phase = Phase::Flushing(FlushState::Dirty);
                None
            }
        }
    }

    /// Applies the debounce timeout. Only meaningful in `DEBOUNCE`.
    pub fn debounce_elapsed(&mut self) -> Option<Effect<T>> {
        if self.phase != Phase::Debounce {
            return None;
        }

        self.phase = Phase::Flushing(FlushState::Clean);
        self.dirty = false;
        Some(Effect::StartFlush(self.latest_contents.clone()))
    }

    /// Applies a successful flush completion.
    pub fn flush_succeeded(&mut self) -> Option<Effect<T>> {
        match self.phase {
            Phase::Flushing(FlushState::Dirty) => {
                self.phase = Phase::Debounce;
                self.error = None;
                Some(Effect::ArmDebounce)
            }
            Phase::Flushing(FlushState::Clean) => {
                self.phase = Phase::Idle;
                self.error = None;
                self.dirty = false;
                Some(Effect::Drained)
            }
            Phase::Idle | Phase::Debounce => None,
        }
    }

    /// Applies a failed flush completion.
    ///
    /// The contents are kept as they are, so the retry resends the newest
    /// value. `dirty` is raised again because nothing was persisted.
    pub fn flush_failed(&mut self, message: impl Into<String>) -> Option<Effect<T>> {
        if !self.phase.is_flushing() {
            return None;
        }

        self.phase = Phase::Debounce;
        self.error = Some(message.into());
        self.dirty = true;
        Some(Effect::ArmDebounce)
    }
}
