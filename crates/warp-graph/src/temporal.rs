// SPDX-License-Identifier: Apache-2.0
//! Temporal predicates over replayed history.
//!
//! `always` and `eventually` fold a causally sorted patch sequence step by
//! step and evaluate a predicate against every intermediate state, starting
//! with the empty state. Evaluation short-circuits as soon as the answer is
//! decided.

use crate::reduce::{reduce_sorted, PatchEntry};
use crate::state::WarpState;

/// `true` iff `predicate` holds at every fold step (including the initial
/// empty state).
pub fn always<P>(entries: &[PatchEntry], mut predicate: P) -> bool
where
    P: FnMut(&WarpState) -> bool,
{
    let mut state = WarpState::new();
    if !predicate(&state) {
        return false;
    }
    for entry in entries {
        state = reduce_sorted(state, std::slice::from_ref(entry), false).state;
        if !predicate(&state) {
            return false;
        }
    }
    true
}

/// `true` iff `predicate` holds at some fold step (including the initial
/// empty state).
pub fn eventually<P>(entries: &[PatchEntry], mut predicate: P) -> bool
where
    P: FnMut(&WarpState) -> bool,
{
    let mut state = WarpState::new();
    if predicate(&state) {
        return true;
    }
    for entry in entries {
        state = reduce_sorted(state, std::slice::from_ref(entry), false).state;
        if predicate(&state) {
            return true;
        }
    }
    false
}
