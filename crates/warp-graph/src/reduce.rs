// SPDX-License-Identifier: Apache-2.0
//! Join reducer: the deterministic fold of patches into state.
//!
//! Given an initial state and a set of `(patch, sha)` pairs, the reducer
//! sorts causally — lamport ascending, then writer id, then commit sha —
//! and applies each op in its declared order. The fold is a pure function:
//! for any set of patches, every topologically consistent ordering under the
//! tuple comparator produces bitwise-identical state.
//!
//! Optionally the reducer emits one [`TickReceipt`] per patch, recording the
//! per-op outcome (`applied`, `superseded`, `redundant`). Receipts are
//! immutable and canonically JSON-serializable with sorted keys.

use serde::Serialize;
use warp_store::Oid;

use crate::crdt::LwwUpdate;
use crate::patch::{Op, Patch};
use crate::provenance::ProvenanceIndex;
use crate::state::WarpState;

/// One patch paired with the sha of the commit that carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchEntry {
    /// Decoded patch.
    pub patch: Patch,
    /// Commit sha (causal tie-breaker of last resort).
    pub sha: Oid,
}

impl PatchEntry {
    /// Pairs a patch with its commit sha.
    #[must_use]
    pub fn new(patch: Patch, sha: Oid) -> Self {
        Self { patch, sha }
    }

    fn sort_key(&self) -> (u64, &str, &str) {
        (
            self.patch.lamport,
            self.patch.writer.as_str(),
            self.sha.as_str(),
        )
    }
}

/// Sorts entries into canonical causal order:
/// `(lamport, writer, sha)` ascending.
pub fn sort_causally(entries: &mut [PatchEntry]) {
    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Per-op outcome in a tick receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpOutcome {
    /// The op changed state.
    Applied,
    /// An LWW write lost to a greater incumbent tag.
    Superseded,
    /// An add event for an element that was already visible.
    Redundant,
}

/// One op's entry in a tick receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpReceipt {
    /// Op name (`NodeAdd`, `PropSet`, …).
    pub op: &'static str,
    /// Entity the op wrote to (node id or encoded edge key).
    pub target: String,
    /// Outcome of applying the op.
    pub result: OpOutcome,
    /// Present for non-applied outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Receipt for one patch: the per-op outcomes of a single fold step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReceipt {
    /// Lamport timestamp of the patch.
    pub lamport: u64,
    /// Per-op outcomes, in declared op order.
    pub ops: Vec<OpReceipt>,
    /// Sha of the patch commit.
    pub patch_sha: String,
    /// Writer of the patch.
    pub writer: String,
}

impl TickReceipt {
    /// Canonical JSON form: object keys sorted at every level.
    ///
    /// # Errors
    ///
    /// Serialization of these plain structs cannot fail in practice; any
    /// `serde_json` error is surfaced verbatim.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        // serde_json::Value maps are BTreeMap-backed: keys come out sorted.
        let value = serde_json::to_value(self)?;
        serde_json::to_string(&value)
    }
}

/// Result of a reduction: the folded state, the per-entity provenance index,
/// and (when requested) per-patch receipts.
#[derive(Debug, Clone)]
pub struct ReduceOutcome {
    /// Folded state.
    pub state: WarpState,
    /// `entity → ordered patch shas` built during the fold.
    pub index: ProvenanceIndex,
    /// Per-patch receipts, present iff requested.
    pub receipts: Option<Vec<TickReceipt>>,
}

/// Folds `entries` into `initial`, sorting causally first.
#[must_use]
pub fn reduce(initial: WarpState, entries: Vec<PatchEntry>, want_receipts: bool) -> ReduceOutcome {
    let mut sorted = entries;
    sort_causally(&mut sorted);
    reduce_sorted(initial, &sorted, want_receipts)
}

/// Folds already-sorted entries into `initial`.
///
/// Callers that sorted via [`sort_causally`] can skip the re-sort.
#[must_use]
pub fn reduce_sorted(
    initial: WarpState,
    entries: &[PatchEntry],
    want_receipts: bool,
) -> ReduceOutcome {
    let mut state = initial;
    let mut index = ProvenanceIndex::new();
    let mut receipts = want_receipts.then(Vec::new);

    for entry in entries {
        let mut op_receipts = want_receipts.then(Vec::new);
        for op in &entry.patch.ops {
            let target = op.target_entity();
            index.record(&target, &entry.sha);
            let (result, reason) = apply_op(&mut state, &entry.patch, op);
            if let Some(ops) = op_receipts.as_mut() {
                ops.push(OpReceipt {
                    op: op.name(),
                    target,
                    result,
                    reason,
                });
            }
        }
        if let (Some(receipts), Some(ops)) = (receipts.as_mut(), op_receipts) {
            receipts.push(TickReceipt {
                lamport: entry.patch.lamport,
                ops,
                patch_sha: entry.sha.as_str().to_owned(),
                writer: entry.patch.writer.as_str().to_owned(),
            });
        }
    }

    ReduceOutcome {
        state,
        index,
        receipts,
    }
}

fn apply_op(state: &mut WarpState, patch: &Patch, op: &Op) -> (OpOutcome, Option<String>) {
    match op {
        Op::NodeAdd { node, dot } => {
            if state.add_node(node.clone(), dot.clone()) {
                (OpOutcome::Redundant, Some("already visible".into()))
            } else {
                (OpOutcome::Applied, None)
            }
        }
        Op::NodeTombstone { node, observed } => {
            state.tombstone_node(node, observed.clone());
            (OpOutcome::Applied, None)
        }
        Op::EdgeAdd { edge, dot } => {
            if state.add_edge(edge, dot.clone()) {
                (OpOutcome::Redundant, Some("already visible".into()))
            } else {
                (OpOutcome::Applied, None)
            }
        }
        Op::EdgeTombstone { edge, observed } => {
            state.tombstone_edge(edge, observed.clone());
            (OpOutcome::Applied, None)
        }
        Op::PropSet {
            target,
            key,
            value,
            dot,
        } => {
            let update = state.set_prop(
                target,
                key,
                value.clone(),
                patch.lamport,
                &patch.writer,
                dot.seq,
            );
            match update {
                LwwUpdate::Applied => (OpOutcome::Applied, None),
                LwwUpdate::Superseded => (
                    OpOutcome::Superseded,
                    Some("incumbent tag is greater".into()),
                ),
            }
        }
    }
}
