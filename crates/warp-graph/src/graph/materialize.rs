// SPDX-License-Identifier: Apache-2.0
//! Materialization: history walk, causal fold, seek-cache integration.

use std::time::Instant;

use tracing::{debug, info, warn};
use warp_store::{Oid, PersistencePort};

use crate::frontier::{decode_frontier, Frontier};
use crate::message::CommitMessage;
use crate::patch::{assert_ops_compatible, Patch};
use crate::reduce::{reduce, PatchEntry, TickReceipt};
use crate::seek;

use super::{CachedState, CancelFlag, GraphError, WarpGraph, CANCEL_CHECK_INTERVAL};

/// Options for one materialization.
#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    /// Upper lamport bound (inclusive); `None` materializes everything.
    pub ceiling: Option<u64>,
    /// Emit per-patch tick receipts. Disables the seek cache for this call.
    pub receipts: bool,
    /// Cooperative cancellation for the history walk.
    pub cancel: Option<CancelFlag>,
}

/// What a materialization did.
#[derive(Debug, Clone)]
pub struct MaterializeSummary {
    /// Number of patches folded (0 for a seek-cache hit).
    pub patch_count: usize,
    /// State hash of the resulting visible projection.
    pub state_hash: String,
    /// `true` when the state was restored from the seek cache.
    pub from_seek_cache: bool,
    /// Per-patch receipts, present iff requested.
    pub receipts: Option<Vec<TickReceipt>>,
}

impl WarpGraph {
    /// Materializes the current state from history.
    ///
    /// With a `ceiling`, patch selection is bounded by lamport timestamp and
    /// the seek cache is consulted first; a hit restores the state but marks
    /// provenance degraded until the next full materialize.
    pub async fn materialize(
        &mut self,
        opts: MaterializeOptions,
    ) -> Result<MaterializeSummary, GraphError> {
        let started = Instant::now();
        let frontier = self.scan_frontier().await?;

        // Seek-cache consult: ceiling-bounded, receipt-free runs only.
        let cache_key = opts
            .ceiling
            .filter(|_| self.options.seek_cache && !opts.receipts)
            .map(|ceiling| seek::cache_key(ceiling, &frontier));
        if let Some(key) = &cache_key {
            if let Some(state) = self.seek.lookup(self.store.as_ref(), key).await {
                let state_hash = state.compute_state_hash_v5()?;
                self.cached = Some(CachedState { state, index: None });
                self.state_dirty = false;
                self.last_frontier = frontier;
                info!(
                    graph = %self.graph,
                    key = %key,
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "materialized from seek cache"
                );
                return Ok(MaterializeSummary {
                    patch_count: 0,
                    state_hash,
                    from_seek_cache: true,
                    receipts: None,
                });
            }
        }

        let entries = self
            .load_patches(&frontier, opts.ceiling, opts.cancel.as_ref())
            .await?;
        let patch_count = entries.len();
        let max_lamport = entries.iter().map(|e| e.patch.lamport).max().unwrap_or(0);
        let outcome = reduce(crate::state::WarpState::new(), entries, opts.receipts);
        let state_hash = outcome.state.compute_state_hash_v5()?;

        // Cache write: skipped when receipts were requested (they demand
        // full provenance) or when no patches matched the ceiling.
        if let Some(key) = &cache_key {
            if patch_count > 0 {
                self.seek
                    .store_entry(self.store.as_ref(), key, &outcome.state)
                    .await;
            }
        }

        self.cached = Some(CachedState {
            state: outcome.state,
            index: Some(outcome.index),
        });
        self.state_dirty = false;
        self.last_frontier = frontier;
        self.observed_max_lamport = self.observed_max_lamport.max(max_lamport);

        info!(
            graph = %self.graph,
            patch_count,
            state_hash = %state_hash,
            ceiling = ?opts.ceiling,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "materialized"
        );
        Ok(MaterializeSummary {
            patch_count,
            state_hash,
            from_seek_cache: false,
            receipts: outcome.receipts,
        })
    }

    /// Materializes the state as of a specific checkpoint or anchor commit.
    pub async fn materialize_at(&mut self, sha: &Oid) -> Result<MaterializeSummary, GraphError> {
        let info = self.store.get_node_info(sha).await?;
        let message = CommitMessage::parse(&info.message)
            .map_err(|e| GraphError::Corrupt(format!("commit {sha} is not a warp commit: {e}")))?;
        let frontier = match message {
            CommitMessage::Checkpoint(checkpoint) => {
                let bytes = self.store.read_blob(&checkpoint.frontier_oid).await?;
                decode_frontier(&bytes)?
            }
            CommitMessage::Anchor(_) => {
                // Anchor parents are the writer tips it covered.
                let mut frontier = Frontier::new();
                for parent in &info.parents {
                    let parent_info = self.store.get_node_info(parent).await?;
                    if let Ok(CommitMessage::Patch(patch)) = CommitMessage::parse(&parent_info.message)
                    {
                        frontier.insert(patch.writer, parent.clone());
                    }
                }
                frontier
            }
            _ => {
                return Err(GraphError::Corrupt(format!(
                    "materialize_at target {sha} is a {:?} commit; \
                     checkpoint or anchor required",
                    message.kind()
                )))
            }
        };

        let entries = self.load_patches(&frontier, None, None).await?;
        let patch_count = entries.len();
        let outcome = reduce(crate::state::WarpState::new(), entries, false);
        let state_hash = outcome.state.compute_state_hash_v5()?;
        self.cached = Some(CachedState {
            state: outcome.state,
            index: Some(outcome.index),
        });
        self.state_dirty = false;
        self.last_frontier = frontier;
        debug!(graph = %self.graph, target = %sha, patch_count, "materialized at commit");
        Ok(MaterializeSummary {
            patch_count,
            state_hash,
            from_seek_cache: false,
            receipts: None,
        })
    }

    // Loads every patch reachable from the frontier tips, ceiling-filtered.
    pub(crate) async fn load_patches(
        &self,
        frontier: &Frontier,
        ceiling: Option<u64>,
        cancel: Option<&CancelFlag>,
    ) -> Result<Vec<PatchEntry>, GraphError> {
        let mut entries = Vec::new();
        for tip in frontier.values() {
            let chain = walk_writer_chain(
                self.store.as_ref(),
                &self.graph,
                tip,
                None,
                cancel,
                self.options.max_schema,
            )
            .await?;
            entries.extend(chain);
        }
        if let Some(ceiling) = ceiling {
            entries.retain(|e| e.patch.lamport <= ceiling);
        }
        Ok(entries)
    }
}

/// Walks one writer chain from `tip` back to `stop_at` (exclusive) or the
/// chain origin, returning patches oldest-first.
///
/// Foreign or non-patch commits terminate the walk; a patch blob that fails
/// to decode is fatal ([`GraphError::Corrupt`]). The cancellation flag is
/// polled every [`CANCEL_CHECK_INTERVAL`] commits.
pub(crate) async fn walk_writer_chain(
    store: &dyn PersistencePort,
    graph: &crate::ident::GraphName,
    tip: &Oid,
    stop_at: Option<&Oid>,
    cancel: Option<&CancelFlag>,
    max_schema: u32,
) -> Result<Vec<PatchEntry>, GraphError> {
    let mut entries = Vec::new();
    let mut cursor = Some(tip.clone());
    let mut walked: u64 = 0;

    while let Some(sha) = cursor.take() {
        if stop_at == Some(&sha) {
            break;
        }
        // Polled at 0, then every CANCEL_CHECK_INTERVAL commits.
        if walked % CANCEL_CHECK_INTERVAL == 0 {
            if let Some(flag) = cancel {
                if flag.is_cancelled() {
                    return Err(GraphError::Aborted {
                        operation: "walk_writer_chain",
                    });
                }
            }
        }
        walked += 1;

        let info = store.get_node_info(&sha).await?;
        let Ok(CommitMessage::Patch(header)) = CommitMessage::parse(&info.message) else {
            // Reached a non-patch commit (foreign history or a chain base).
            warn!(sha = %sha, "writer chain walk stopped at non-patch commit");
            break;
        };
        if header.graph != *graph {
            break;
        }

        let blob = store.read_blob(&header.patch_oid).await?;
        let patch = Patch::decode(&blob)
            .map_err(|e| GraphError::Corrupt(format!("patch blob {} : {e}", header.patch_oid)))?;
        assert_ops_compatible(&patch.ops, max_schema)?;
        entries.push(PatchEntry::new(patch, sha));

        cursor = info.parents.first().cloned();
    }

    entries.reverse();
    Ok(entries)
}
