//! Flux Refinement Types for tzfailover
//!
//! This module contains Flux refinement type annotations for critical functions.
//! To verify, install Flux and run: flux-rs check verification/flux/lib.rs
//!
//! Flux installation: https://github.com/flux-rs/flux

// ============================================================================
// DURATION SETTINGS: positive millisecond values
// ============================================================================

/// A configured delay in milliseconds (must be positive)
#[flux::alias(type DelayMs = u64{v: v > 0})]
pub type DelayMs = u64;

/// Parse a millisecond setting string into a positive delay
///
/// Flux signature ensures the output is positive or None
#[flux::sig(fn(s: &str) -> Option<u64{v: v > 0}>)]
pub fn parse_delay_ms(s: &str) -> Option<u64> {
    let ms: u64 = s.parse().ok()?;
    if ms == 0 {
        None
    } else {
        Some(ms)
    }
}

/// Parse a delay with a default value
///
/// Flux signature ensures the output is always positive
#[flux::sig(fn(s: &str, default: u64{v: v > 0}) -> u64{v: v > 0})]
pub fn parse_delay_ms_or_default(s: &str, default: u64) -> u64 {
    parse_delay_ms(s).unwrap_or(default)
}

// ============================================================================
// INITIALIZATION FUZZ: bounded by the base timeout
// ============================================================================

/// Clamp a fuzz setting to never exceed the base initialization timeout
///
/// Flux signature expresses the bound directly
#[flux::sig(fn(base_ms: u64, fuzz_ms: u64) -> u64{v: v <= base_ms})]
pub fn clamp_fuzz(base_ms: u64, fuzz_ms: u64) -> u64 {
    if fuzz_ms <= base_ms {
        fuzz_ms
    } else {
        base_ms
    }
}

/// Total initialization delay stays within base + fuzz cap
#[flux::sig(fn(base_ms: u64{v: v <= 86400000}, fuzz_ms: u64{v: v <= base_ms})
            -> u64{v: v >= base_ms && v <= base_ms + base_ms})]
pub fn total_init_delay(base_ms: u64, fuzz_ms: u64) -> u64 {
    base_ms + fuzz_ms
}

// ============================================================================
// PROVIDER STATE: encoded state codes stay in range
// ============================================================================

/// Encoded provider state (0=disabled .. 4=permanently failed)
#[flux::alias(type StateCode = u8{v: v <= 4})]
pub type StateCode = u8;

pub const DISABLED: u8 = 0;
pub const ENABLED_INITIALIZING: u8 = 1;
pub const ENABLED_CERTAIN: u8 = 2;
pub const ENABLED_UNCERTAIN: u8 = 3;
pub const PERM_FAILED: u8 = 4;

/// Apply an event code (0=success, 1=uncertain, 2=failure) to a state code
///
/// Flux ensures the result is always a valid state code
#[flux::sig(fn(state: u8{v: v <= 4}, event: u8{v: v <= 2}) -> u8{v: v <= 4})]
pub fn event_transition(state: u8, event: u8) -> u8 {
    if state == DISABLED || state == PERM_FAILED {
        return state;
    }
    match event {
        0 => ENABLED_CERTAIN,
        1 => ENABLED_UNCERTAIN,
        _ => PERM_FAILED,
    }
}

// ============================================================================
// DEBUG TRAIL: bounded growth
// ============================================================================

/// Maximum number of trail lines carried on a suggestion
pub const MAX_TRAIL_LINES: usize = 32;

/// Append a trail line, dropping the oldest once the cap is reached
///
/// Flux signature ensures the trail never exceeds the cap
#[flux::sig(fn(trail: Vec<String>{v: v.len() <= MAX_TRAIL_LINES}, line: String)
            -> Vec<String>{v: v.len() <= MAX_TRAIL_LINES})]
pub fn push_trail_line(mut trail: Vec<String>, line: String) -> Vec<String> {
    if trail.len() >= MAX_TRAIL_LINES {
        trail.remove(0);
    }
    trail.push(line);
    trail
}

// ============================================================================
// USER IDS: switch detection
// ============================================================================

/// Detect whether a configuration delivery represents a user switch
#[flux::sig(fn(old_user: u32, new_user: u32) -> bool[old_user != new_user])]
pub fn is_user_switch(old_user: u32, new_user: u32) -> bool {
    old_user != new_user
}

// ============================================================================
// TESTS (standard Rust tests, Flux verifies at compile time)
// ============================================================================
