//! Aeneas-compatible Rust code for Lean verification
//!
//! This module contains simplified Rust code that can be translated to Lean 4
//! using Aeneas for formal verification.
//!
//! To verify:
//!   1. Install Aeneas: https://github.com/AeneasVerif/aeneas
//!   2. Run: aeneas -backend lean4 src/lib.rs
//!   3. Write proofs in the generated Lean files
//!
//! Note: Aeneas works best with simple, ownership-clear code.
//! Avoid: unsafe, RefCell, async, complex generics.

/// Provider lifecycle state, simplified for translation
#[derive(Clone, Copy, PartialEq)]
pub enum State {
    Disabled,
    Initializing,
    Certain,
    Uncertain,
    PermFailed,
}

/// Provider report, simplified for translation
#[derive(Clone, Copy, PartialEq)]
pub enum Event {
    Success,
    Uncertain,
    Failure,
}

/// Whether a state accepts events
pub fn is_enabled(state: State) -> bool {
    matches!(state, State::Initializing | State::Certain | State::Uncertain)
}

/// The event-driven transition: inert unless the provider is enabled
pub fn event_transition(state: State, event: Event) -> State {
    if !is_enabled(state) {
        return state;
    }
    match event {
        Event::Success => State::Certain,
        Event::Uncertain => State::Uncertain,
        Event::Failure => State::PermFailed,
    }
}

/// Explicit list of events (Aeneas prefers explicit lists)
#[derive(Clone)]
pub enum EventList {
    Nil,
    Cons(Event, Box<EventList>),
}

impl EventList {
    pub fn new() -> Self {
        EventList::Nil
    }

    pub fn len(&self) -> u32 {
        match self {
            EventList::Nil => 0,
            EventList::Cons(_, tail) => 1 + tail.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, EventList::Nil)
    }

    pub fn push(self, event: Event) -> Self {
        EventList::Cons(event, Box::new(self))
    }
}

/// Fold a whole event list through the transition function.
/// Target lemma in Lean: if any event in the list is Failure and the start
/// state is enabled, the result is PermFailed.
pub fn run_events(state: State, events: &EventList) -> State {
    match events {
        EventList::Nil => state,
        EventList::Cons(event, tail) => run_events(event_transition(state, *event), tail),
    }
}

/// A simplified two-provider arbitration snapshot
pub struct Arbitration {
    pub primary: State,
    pub secondary: State,
    pub timer_pending: bool,
}

impl Arbitration {
    pub fn new() -> Self {
        Arbitration {
            primary: State::Initializing,
            secondary: State::Disabled,
            timer_pending: false,
        }
    }

    /// Apply a primary report and the controller's reaction to it.
    /// Target lemma in Lean: certainty always clears the timer, and the
    /// secondary is enabled only while the primary is unhappy.
    pub fn primary_report(&mut self, event: Event) {
        self.primary = event_transition(self.primary, event);
        match self.primary {
            State::Certain => {
                self.timer_pending = false;
                if is_enabled(self.secondary) {
                    self.secondary = State::Disabled;
                }
            }
            State::Uncertain => {
                if !self.timer_pending {
                    self.timer_pending = true;
                }
                if self.secondary == State::Disabled {
                    self.secondary = State::Initializing;
                }
            }
            State::PermFailed => {
                if self.secondary == State::Disabled {
                    self.secondary = State::Initializing;
                } else if self.secondary == State::PermFailed {
                    self.timer_pending = false;
                }
            }
            _ => {}
        }
    }

    /// Both providers dead and no timer: nothing can fire again
    pub fn is_quiescent(&self) -> bool {
        self.primary == State::PermFailed
            && self.secondary == State::PermFailed
            && !self.timer_pending
    }
}
