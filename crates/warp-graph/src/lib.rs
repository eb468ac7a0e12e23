// SPDX-License-Identifier: Apache-2.0
//! warp-graph: distributed, content-addressed, causally-consistent
//! property-graph engine.
//!
//! Writers independently emit patch commits onto per-writer chains in a
//! Git-like object store; any replica deterministically materializes the
//! current graph by reducing the causal DAG of patches through CRDT
//! semantics (OR-Set membership, LWW properties with dotted causal tags).
//! On top of the join reducer sit time-travel (ceiling-bounded
//! materialization), slicing (backward causal cones), authenticated
//! Boundary Transition Records, the frontier-exchange sync protocol, and a
//! self-healing seek cache.
//!
//! The engine core is pure and synchronous; everything that touches the
//! object store goes through the async `PersistencePort` from `warp-store`.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

pub mod btr;
pub mod canonical;
pub mod crdt;
pub mod frontier;
mod graph;
pub mod ident;
pub mod keys;
pub mod message;
pub mod patch;
pub mod payload;
pub mod provenance;
pub mod reduce;
pub mod refs;
pub mod seek;
pub mod state;
pub mod temporal;
mod wire;

/// BTR creation/verification and its failure taxonomy.
pub use btr::{
    create_btr, verify_btr, BoundaryTransitionRecord, BtrError, VerifyOutcome, VerifyReason,
};
/// Canonical codec entry points.
pub use canonical::{decode_value, encode_value, CodecError};
/// CRDT building blocks.
pub use crdt::{Dot, LwwRegister, LwwUpdate, OrSet, VersionVector};
/// Frontier type and staleness check.
pub use frontier::{frontier_changed, Frontier};
/// The orchestrator and its operation surface.
pub use graph::{
    ops_digest, sync_needed, AppliedSync, CancelFlag, CheckpointRecord, CommitReceipt, GcReport, GraphError,
    GraphOptions, GraphView, MaterializeOptions, MaterializeSummary, PatchBuilder, SliceResult,
    StateFreshness, Status, SyncPatch, SyncRequest, SyncResponse, ViewOptions, WarpGraph,
    CANCEL_CHECK_INTERVAL, DEFAULT_MAX_SCHEMA, SYNC_REQUEST_TYPE, SYNC_RESPONSE_TYPE,
};
/// Validated identifier types.
pub use ident::{GraphName, IdentError, Lamport, WriterId};
/// Composite key codec.
pub use keys::{EdgeKey, KeyError, PropTarget};
/// Commit message codec.
pub use message::{detect_message_kind, AuditReceipt, CommitMessage, MessageError, MessageKind};
/// Patch wire objects and schema gates.
pub use patch::{assert_ops_compatible, detect_schema_version, Op, Patch, PatchError};
/// Replayable payload monoid.
pub use payload::ProvenancePayload;
/// Per-entity provenance index.
pub use provenance::ProvenanceIndex;
/// Join reducer and tick receipts.
pub use reduce::{reduce, sort_causally, OpOutcome, OpReceipt, PatchEntry, ReduceOutcome, TickReceipt};
/// Materialized state and canonical serializations.
pub use state::WarpState;
