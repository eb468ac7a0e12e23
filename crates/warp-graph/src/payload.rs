// SPDX-License-Identifier: Apache-2.0
//! Replayable provenance payloads.
//!
//! A [`ProvenancePayload`] is an immutable, ordered sequence of
//! `(patch, sha)` entries forming a monoid under concatenation: the empty
//! payload is the identity, and concatenation is associative because replay
//! preserves entry order instead of re-sorting. Causal cones hand out
//! payloads already in canonical order; `replay` folds them through the join
//! reducer from any initial state.

use ciborium::value::Value;
use warp_store::Oid;

use crate::canonical::{self, map, CodecError};
use crate::patch::{Patch, PatchError};
use crate::reduce::{reduce_sorted, PatchEntry, ReduceOutcome};
use crate::state::WarpState;
use crate::wire;

/// Immutable ordered sequence of patch entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvenancePayload {
    entries: Vec<PatchEntry>,
}

impl ProvenancePayload {
    /// The identity payload.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps entries in declared order (callers are responsible for causal
    /// order when it matters; cones sort before constructing).
    #[must_use]
    pub fn new(entries: Vec<PatchEntry>) -> Self {
        Self { entries }
    }

    /// Number of patches in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` iff this is the identity payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries in order.
    #[must_use]
    pub fn entries(&self) -> &[PatchEntry] {
        &self.entries
    }

    /// Concatenation: `self` followed by `other`.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut entries = self.entries.clone();
        entries.extend(other.entries.iter().cloned());
        Self { entries }
    }

    /// Sub-payload over `[start, end)`, clamped to the valid range.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.entries.len());
        let start = start.min(end);
        Self {
            entries: self.entries[start..end].to_vec(),
        }
    }

    /// Replays the sequence through the join reducer from `initial`,
    /// preserving entry order.
    #[must_use]
    pub fn replay(&self, initial: WarpState) -> ReduceOutcome {
        reduce_sorted(initial, &self.entries, false)
    }

    /// Maps the payload to its canonical wire value: an array of
    /// `{ patch, sha }` entries.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .map(|e| {
                    map(vec![
                        ("patch", e.patch.to_value()),
                        ("sha", Value::Text(e.sha.as_str().to_owned())),
                    ])
                })
                .collect(),
        )
    }

    /// Reads a payload back from its wire value.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError`] for malformed entries or invalid shas.
    pub fn from_value(value: &Value) -> Result<Self, PatchError> {
        let Value::Array(items) = value else {
            return Err(PatchError::Malformed("payload must be an array".into()));
        };
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let patch = Patch::from_value(wire::get(item, "patch")?)?;
            let sha = Oid::parse(wire::get_text(item, "sha")?)
                .map_err(|e| PatchError::Malformed(e.to_string()))?;
            entries.push(PatchEntry::new(patch, sha));
        }
        Ok(Self { entries })
    }

    /// Encodes to canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if a property value is not encodable.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        canonical::encode_value(&self.to_value())
    }

    /// Decodes from canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError`] for codec or shape violations.
    pub fn decode(bytes: &[u8]) -> Result<Self, PatchError> {
        Self::from_value(&canonical::decode_value(bytes)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crdt::{Dot, VersionVector};
    use crate::ident::WriterId;
    use crate::patch::{Op, SCHEMA_V2};

    fn w(s: &str) -> WriterId {
        WriterId::parse(s).unwrap()
    }

    fn oid(byte: u8) -> Oid {
        Oid::parse(&hex::encode([byte; 32])).unwrap()
    }

    fn entry(writer: &str, lamport: u64, node: &str, byte: u8) -> PatchEntry {
        PatchEntry::new(
            Patch {
                schema: SCHEMA_V2,
                writer: w(writer),
                lamport,
                context: VersionVector::new(),
                ops: vec![Op::NodeAdd {
                    node: node.into(),
                    dot: Dot::new(w(writer), lamport),
                }],
                reads: vec![],
            },
            oid(byte),
        )
    }

    #[test]
    fn monoid_identity() {
        let p = ProvenancePayload::new(vec![entry("a", 1, "x", 1)]);
        assert_eq!(ProvenancePayload::empty().concat(&p), p);
        assert_eq!(p.concat(&ProvenancePayload::empty()), p);
    }

    #[test]
    fn monoid_associativity() {
        let a = ProvenancePayload::new(vec![entry("a", 1, "x", 1)]);
        let b = ProvenancePayload::new(vec![entry("b", 2, "y", 2)]);
        let c = ProvenancePayload::new(vec![entry("c", 3, "z", 3)]);
        assert_eq!(a.concat(&b).concat(&c), a.concat(&b.concat(&c)));
    }

    #[test]
    fn slice_yields_sub_payload() {
        let p = ProvenancePayload::new(vec![
            entry("a", 1, "x", 1),
            entry("a", 2, "y", 2),
            entry("a", 3, "z", 3),
        ]);
        let s = p.slice(1, 3);
        assert_eq!(s.len(), 2);
        assert_eq!(s.entries()[0].patch.lamport, 2);
        // Clamped.
        assert_eq!(p.slice(2, 99).len(), 1);
        assert_eq!(p.slice(5, 2).len(), 0);
    }

    #[test]
    fn replay_folds_in_order() {
        let p = ProvenancePayload::new(vec![entry("a", 1, "x", 1), entry("b", 2, "y", 2)]);
        let outcome = p.replay(WarpState::new());
        assert!(outcome.state.has_node("x"));
        assert!(outcome.state.has_node("y"));
        assert_eq!(
            ProvenancePayload::empty()
                .replay(WarpState::new())
                .state
                .compute_state_hash_v5()
                .unwrap(),
            WarpState::new().compute_state_hash_v5().unwrap()
        );
    }

    #[test]
    fn wire_round_trip() {
        let p = ProvenancePayload::new(vec![entry("a", 1, "x", 1), entry("b", 2, "y", 2)]);
        let bytes = p.encode().unwrap();
        assert_eq!(ProvenancePayload::decode(&bytes).unwrap(), p);
    }
}
