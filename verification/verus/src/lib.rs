//! Verus Formal Verification for tzfailover
//!
//! This module contains Verus specifications and proofs for critical functions.
//! To verify, install Verus and run: verus verification/verus/src/lib.rs
//!
//! Verus installation: https://github.com/verus-lang/verus

use vstd::prelude::*;

verus! {

// ============================================================================
// PROVIDER STATE MACHINE: permanent failure is absorbing
// ============================================================================

// State encoding:
//   0 = disabled
//   1 = enabled-initializing
//   2 = enabled-certain
//   3 = enabled-uncertain
//   4 = permanently failed
pub const DISABLED: u8 = 0;
pub const ENABLED_INITIALIZING: u8 = 1;
pub const ENABLED_CERTAIN: u8 = 2;
pub const ENABLED_UNCERTAIN: u8 = 3;
pub const PERM_FAILED: u8 = 4;

// Event encoding: 0 = success, 1 = uncertain, 2 = permanent failure.
pub const EV_SUCCESS: u8 = 0;
pub const EV_UNCERTAIN: u8 = 1;
pub const EV_FAILURE: u8 = 2;

/// Specification: whether a state accepts provider events at all
#[spec]
pub fn state_is_enabled(state: u8) -> bool {
    state == ENABLED_INITIALIZING || state == ENABLED_CERTAIN || state == ENABLED_UNCERTAIN
}

/// Specification: the event-driven transition function
#[spec]
pub fn event_transition(state: u8, event: u8) -> u8 {
    if !state_is_enabled(state) {
        state
    } else if event == EV_SUCCESS {
        ENABLED_CERTAIN
    } else if event == EV_UNCERTAIN {
        ENABLED_UNCERTAIN
    } else {
        PERM_FAILED
    }
}

/// Proof: a permanently failed provider never leaves that state
#[proof]
pub fn lemma_perm_failed_absorbing(event: u8)
    ensures
        event_transition(PERM_FAILED, event) == PERM_FAILED,
{
    // PERM_FAILED is not an enabled state, so the transition is inert
}

/// Proof: events cannot move a disabled provider
#[proof]
pub fn lemma_disabled_inert(event: u8)
    ensures
        event_transition(DISABLED, event) == DISABLED,
{
    // Direct from the enabled-state guard
}

/// Proof: an enabled provider always lands in an enabled or failed state,
/// never back in disabled
#[proof]
pub fn lemma_events_never_disable(state: u8, event: u8)
    requires
        state_is_enabled(state),
    ensures
        event_transition(state, event) != DISABLED,
{
    if event == EV_SUCCESS {
        assert(event_transition(state, event) == ENABLED_CERTAIN);
    } else if event == EV_UNCERTAIN {
        assert(event_transition(state, event) == ENABLED_UNCERTAIN);
    } else {
        assert(event_transition(state, event) == PERM_FAILED);
    }
}

/// Proof: the transition is idempotent for repeated identical events
#[proof]
pub fn lemma_transition_idempotent(state: u8, event: u8)
    ensures
        event_transition(event_transition(state, event), event)
            == event_transition(state, event),
{
    let once = event_transition(state, event);
    if !state_is_enabled(state) {
        assert(once == state);
    } else if event == EV_FAILURE {
        lemma_perm_failed_absorbing(event);
    } else {
        // once is ENABLED_CERTAIN or ENABLED_UNCERTAIN, both enabled,
        // and the same event maps any enabled state to the same target
        assert(state_is_enabled(once));
    }
}

/// Executable transition with verified contract
#[exec]
pub fn event_transition_verified(state: u8, event: u8) -> (result: u8)
    ensures
        result == event_transition(state, event),
{
    if state != ENABLED_INITIALIZING && state != ENABLED_CERTAIN && state != ENABLED_UNCERTAIN {
        state
    } else if event == EV_SUCCESS {
        ENABLED_CERTAIN
    } else if event == EV_UNCERTAIN {
        ENABLED_UNCERTAIN
    } else {
        PERM_FAILED
    }
}

// ============================================================================
// INITIALIZATION TIMEOUT: fuzzed delay is bounded and never shrinks
// ============================================================================

/// Specification: the effective initialization delay in milliseconds
#[spec]
pub fn fuzzed_delay(base_ms: nat, fuzz_ms: nat) -> nat {
    base_ms + fuzz_ms
}

/// Proof: fuzz never makes the delay shorter than the configured base
#[proof]
pub fn lemma_fuzz_never_shrinks(base_ms: nat, fuzz_ms: nat)
    ensures
        fuzzed_delay(base_ms, fuzz_ms) >= base_ms,
{
    // nat addition is monotone
}

/// Proof: a fuzz draw within its configured cap keeps the delay within
/// base + cap
#[proof]
pub fn lemma_fuzz_bounded(base_ms: nat, fuzz_ms: nat, cap_ms: nat)
    requires
        fuzz_ms <= cap_ms,
    ensures
        fuzzed_delay(base_ms, fuzz_ms) <= base_ms + cap_ms,
{
    // Monotone in the second argument
}

// ============================================================================
// UNCERTAINTY DEBOUNCE: the first schedule fixes the deadline
// ============================================================================

/// Specification: scheduling against a slot that may already hold a deadline.
/// An occupied slot keeps its deadline; only an empty slot takes the new one.
#[spec]
pub fn schedule_deadline(pending: Option<nat>, now: nat, delay: nat) -> nat {
    match pending {
        Some(deadline) => deadline,
        None => now + delay,
    }
}

/// Proof: re-scheduling never moves an existing deadline
#[proof]
pub fn lemma_schedule_keeps_existing(deadline: nat, now: nat, delay: nat)
    ensures
        schedule_deadline(Some(deadline), now, delay) == deadline,
{
    // Direct from definition
}

/// Proof: repeated uncertainty reports leave the deadline where the first
/// report put it
#[proof]
pub fn lemma_repeat_schedule_fixed_point(now0: nat, delay: nat, now1: nat)
    requires
        now1 >= now0,
    ensures
        schedule_deadline(
            Some(schedule_deadline(None, now0, delay)),
            now1,
            delay,
        ) == now0 + delay,
{
    lemma_schedule_keeps_existing(now0 + delay, now1, delay);
}

/// Proof: the deadline of a fresh schedule is never in the past
#[proof]
pub fn lemma_fresh_deadline_not_past(now: nat, delay: nat)
    ensures
        schedule_deadline(None, now, delay) >= now,
{
    // now + delay >= now for nat delay
}

} // verus!
