// SPDX-License-Identifier: Apache-2.0
//! CRDT primitives: dots, OR-Sets, LWW registers, version vectors.
//!
//! These are the convergence engine of the graph: the join reducer folds
//! patch operations into [`OrSet`]s and [`LwwRegister`]s, and any two
//! replicas that have seen the same patches hold bitwise-identical state.
//! All interior maps are `BTreeMap`/`BTreeSet` so iteration order — and
//! therefore canonical serialization — is deterministic.

mod lww;
mod orset;
mod version_vector;

pub use lww::{LwwRegister, LwwUpdate};
pub use orset::{DotSet, OrSet};
pub use version_vector::VersionVector;

use crate::ident::WriterId;

/// Causal identifier of one add event: `(writer, seq)`.
///
/// Every `NodeAdd`/`EdgeAdd` op carries a dot; tombstones name the dots they
/// observed. Dots order by `(writer, seq)` which gives tombstone sets and
/// serializations a stable order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Dot {
    /// Writer that produced the add event.
    pub writer: WriterId,
    /// The writer's sequence number for the event (1-based).
    pub seq: u64,
}

impl Dot {
    /// Builds a dot.
    #[must_use]
    pub fn new(writer: WriterId, seq: u64) -> Self {
        Self { writer, seq }
    }
}

impl std::fmt::Display for Dot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.writer, self.seq)
    }
}
