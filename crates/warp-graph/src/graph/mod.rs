// SPDX-License-Identifier: Apache-2.0
//! The `WarpGraph` orchestrator.
//!
//! One concrete type owns the ports and the derived caches; its methods are
//! grouped into files by concern: materialization (`materialize`), patch
//! building and commit (`commit`), checkpoints/anchors/GC (`checkpoint`),
//! guarded reads and views (`query`), causal-cone slicing (`slice`), and the
//! sync protocol (`sync`).
//!
//! Cache discipline: `cached` holds the last materialized state plus its
//! provenance index; `last_frontier` remembers the writer tips that state
//! was reduced from; `state_dirty` flips when a frontier change is observed.
//! Local commits and sync applies advance the cache eagerly, so
//! `has_frontier_changed` reports `false` immediately afterwards.

mod checkpoint;
mod commit;
mod materialize;
mod query;
mod slice;
mod sync;

pub use checkpoint::{CheckpointRecord, GcReport};
pub use commit::{ops_digest, CommitReceipt, PatchBuilder};
pub use materialize::{MaterializeOptions, MaterializeSummary};
pub use query::{GraphView, StateFreshness, Status, ViewOptions};
pub use slice::SliceResult;
pub use sync::{
    sync_needed, AppliedSync, SyncPatch, SyncRequest, SyncResponse, SYNC_REQUEST_TYPE,
    SYNC_RESPONSE_TYPE,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use warp_store::{PersistencePort, StoreError};

use crate::canonical::CodecError;
use crate::frontier::Frontier;
use crate::ident::{GraphName, IdentError, WriterId};
use crate::keys::KeyError;
use crate::message::MessageError;
use crate::patch::PatchError;
use crate::provenance::ProvenanceIndex;
use crate::refs::RefError;
use crate::seek::SeekCache;
use crate::state::WarpState;

/// Schema ceiling accepted by default (full schema-3 support).
pub const DEFAULT_MAX_SCHEMA: u32 = 3;

/// Options for opening a graph handle.
#[derive(Debug, Clone)]
pub struct GraphOptions {
    /// Transparently materialize when a query finds the cache missing or
    /// stale, instead of failing with `E_NO_STATE` / `E_STALE_STATE`.
    pub auto_materialize: bool,
    /// Highest patch schema this reader accepts.
    pub max_schema: u32,
    /// Consult and populate the seek cache for ceiling-bounded
    /// materializations.
    pub seek_cache: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            auto_materialize: false,
            max_schema: DEFAULT_MAX_SCHEMA,
            seek_cache: true,
        }
    }
}

/// Errors surfaced by graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// No materialized state has ever been cached.
    #[error(
        "[E_NO_STATE] no materialized state; call materialize() or open the \
         graph with auto_materialize"
    )]
    NoState,
    /// The cached state is stale (writer tips moved since the last
    /// materialize).
    #[error(
        "[E_STALE_STATE] cached state is stale; call materialize() or open \
         the graph with auto_materialize"
    )]
    StaleState,
    /// The cached state came from the seek cache; the provenance index was
    /// not reconstructed.
    #[error(
        "[E_PROVENANCE_DEGRADED] state was restored from the seek cache; run \
         a full materialize() to rebuild provenance"
    )]
    ProvenanceDegraded,
    /// A long traversal was cancelled.
    #[error("operation aborted: {operation}")]
    Aborted {
        /// Name of the cancelled operation.
        operation: &'static str,
    },
    /// A patch blob failed to decode: fatal to materialization.
    #[error("corrupt history: {0}")]
    Corrupt(String),
    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Patch codec failure.
    #[error(transparent)]
    Patch(#[from] PatchError),
    /// Canonical codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Commit message failure.
    #[error(transparent)]
    Message(#[from] MessageError),
    /// Identifier validation failure.
    #[error(transparent)]
    Ident(#[from] IdentError),
    /// Ref path failure.
    #[error(transparent)]
    Ref(#[from] RefError),
    /// Key codec failure.
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Cooperative cancellation flag for long traversals.
///
/// Traversals poll the flag every [`CANCEL_CHECK_INTERVAL`] commits and fail
/// with [`GraphError::Aborted`] once it is raised.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

/// How many walked commits pass between cancellation checks.
pub const CANCEL_CHECK_INTERVAL: u64 = 1000;

impl CancelFlag {
    /// Creates an un-raised flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// Materialized cache: the state plus (unless seek-cache restored) the
// provenance index that reduction built alongside it.
#[derive(Debug, Clone)]
pub(crate) struct CachedState {
    pub(crate) state: WarpState,
    pub(crate) index: Option<ProvenanceIndex>,
}

/// Handle to one graph in one store, bound to a local writer identity.
pub struct WarpGraph {
    pub(crate) store: Arc<dyn PersistencePort>,
    pub(crate) graph: GraphName,
    pub(crate) writer: WriterId,
    pub(crate) options: GraphOptions,
    pub(crate) seek: SeekCache,
    pub(crate) cached: Option<CachedState>,
    pub(crate) state_dirty: bool,
    pub(crate) last_frontier: Frontier,
    pub(crate) observed_max_lamport: u64,
    pub(crate) patches_since_checkpoint: u64,
}

impl WarpGraph {
    /// Opens a graph handle.
    pub fn open(
        store: Arc<dyn PersistencePort>,
        graph: GraphName,
        writer: WriterId,
        options: GraphOptions,
    ) -> Self {
        let seek = SeekCache::new(&graph);
        Self {
            store,
            graph,
            writer,
            options,
            seek,
            cached: None,
            state_dirty: false,
            last_frontier: Frontier::new(),
            observed_max_lamport: 0,
            patches_since_checkpoint: 0,
        }
    }

    /// The graph name this handle is bound to.
    #[must_use]
    pub fn graph_name(&self) -> &GraphName {
        &self.graph
    }

    /// The local writer identity.
    #[must_use]
    pub fn writer_id(&self) -> &WriterId {
        &self.writer
    }

    /// Scans writer refs into the current frontier.
    pub(crate) async fn scan_frontier(&self) -> Result<Frontier, GraphError> {
        let prefix = crate::refs::writers_prefix(&self.graph);
        let mut frontier = Frontier::new();
        for record in self.store.list_refs(&prefix).await? {
            let writer = crate::refs::parse_writer_ref(&self.graph, &record.name)?;
            frontier.insert(writer, record.target);
        }
        Ok(frontier)
    }

    /// Compares the captured frontier against a fresh scan of writer refs.
    pub async fn has_frontier_changed(&self) -> Result<bool, GraphError> {
        let current = self.scan_frontier().await?;
        Ok(crate::frontier::frontier_changed(&self.last_frontier, &current))
    }
}

impl std::fmt::Debug for WarpGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarpGraph")
            .field("graph", &self.graph)
            .field("writer", &self.writer)
            .field("state_dirty", &self.state_dirty)
            .field("cached", &self.cached.is_some())
            .field("writers", &self.last_frontier.len())
            .finish_non_exhaustive()
    }
}
