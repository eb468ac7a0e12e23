// SPDX-License-Identifier: Apache-2.0
//! Checkpoints, coverage anchors, and GC.

use tracing::info;
use warp_store::Oid;

use crate::canonical;
use crate::frontier::encode_frontier;
use crate::message::{AnchorMessage, CheckpointMessage, CommitMessage};
use crate::refs::{checkpoint_head_ref, coverage_head_ref};

use super::{GraphError, MaterializeOptions, WarpGraph};

/// What a checkpoint commit recorded.
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    /// Sha of the checkpoint commit.
    pub sha: Oid,
    /// State hash of the checkpointed visible projection.
    pub state_hash: String,
    /// Blob oid of the serialized frontier.
    pub frontier_oid: Oid,
    /// Blob oid of the serialized provenance index.
    pub index_oid: Oid,
    /// Schema ceiling the state was materialized under.
    pub schema: u32,
}

/// Advisory GC report.
#[derive(Debug, Clone)]
pub struct GcReport {
    /// Patches committed or applied since the last checkpoint.
    pub patches_since_checkpoint: u64,
    /// Tombstone-to-dot ratio of the cached state (0.0 without a cache).
    pub tombstone_ratio: f64,
    /// `true` when a seek-cache ref existed and was deleted.
    pub seek_cache_cleared: bool,
}

impl WarpGraph {
    /// Creates a checkpoint of the current state.
    ///
    /// Re-materializes first when the cache is missing, stale, or
    /// provenance-degraded, then writes the serialized state, frontier, and
    /// provenance index as blobs, commits a checkpoint message, and advances
    /// `checkpoints/head`.
    pub async fn create_checkpoint(&mut self) -> Result<CheckpointRecord, GraphError> {
        let needs_full = self.cached.as_ref().is_none_or(|c| c.index.is_none());
        if needs_full || self.state_dirty || self.has_frontier_changed().await? {
            self.materialize(MaterializeOptions::default()).await?;
        }
        let Some(cached) = self.cached.as_ref() else {
            return Err(GraphError::NoState);
        };
        let Some(index) = cached.index.as_ref() else {
            return Err(GraphError::ProvenanceDegraded);
        };

        let state_hash = cached.state.compute_state_hash_v5()?;
        let state_bytes = cached.state.encode_full()?;
        let frontier_bytes = encode_frontier(&self.last_frontier)?;
        let index_bytes = canonical::encode_value(&index.to_value())?;

        // The state blob participates in the checkpoint through its content
        // hash; the frontier and index blobs are referenced by trailer.
        self.store.write_blob(&state_bytes).await?;
        let frontier_oid = self.store.write_blob(&frontier_bytes).await?;
        let index_oid = self.store.write_blob(&index_bytes).await?;

        let schema = self.options.max_schema;
        let message = CommitMessage::Checkpoint(CheckpointMessage {
            graph: self.graph.clone(),
            state_hash: state_hash.clone(),
            frontier_oid: frontier_oid.clone(),
            index_oid: index_oid.clone(),
            schema,
        })
        .render();

        let head_ref = checkpoint_head_ref(&self.graph);
        let parents: Vec<Oid> = self.store.read_ref(&head_ref).await?.into_iter().collect();
        let sha = self.store.commit_node(&message, &parents, false).await?;
        self.store.update_ref(&head_ref, &sha).await?;
        self.patches_since_checkpoint = 0;

        info!(
            graph = %self.graph,
            sha = %sha,
            state_hash = %state_hash,
            "created checkpoint"
        );
        Ok(CheckpointRecord {
            sha,
            state_hash,
            frontier_oid,
            index_oid,
            schema,
        })
    }

    /// Creates a coverage anchor: a merge-only commit whose parents are all
    /// current writer tips. Returns `None` when the graph has no writers.
    pub async fn sync_coverage(&mut self) -> Result<Option<Oid>, GraphError> {
        let frontier = self.scan_frontier().await?;
        if frontier.is_empty() {
            return Ok(None);
        }
        let message = CommitMessage::Anchor(AnchorMessage {
            graph: self.graph.clone(),
            schema: self.options.max_schema,
        })
        .render();
        let parents: Vec<Oid> = frontier.values().cloned().collect();
        let sha = self.store.commit_node(&message, &parents, false).await?;
        self.store
            .update_ref(&coverage_head_ref(&self.graph), &sha)
            .await?;
        info!(graph = %self.graph, sha = %sha, tips = parents.len(), "anchored coverage");
        Ok(Some(sha))
    }

    /// Advisory GC: reports cache pressure and clears the seek cache.
    ///
    /// History is append-only and never rewritten; reclaiming patch commits
    /// is the backing store's concern.
    pub async fn gc(&mut self) -> Result<GcReport, GraphError> {
        let seek_ref = self.seek.ref_name().to_owned();
        let had_cache = self.store.read_ref(&seek_ref).await?.is_some();
        if had_cache {
            self.store.delete_ref(&seek_ref).await?;
        }
        Ok(GcReport {
            patches_since_checkpoint: self.patches_since_checkpoint,
            tombstone_ratio: self
                .cached
                .as_ref()
                .map_or(0.0, |c| c.state.tombstone_ratio()),
            seek_cache_cleared: had_cache,
        })
    }

    /// Saves the current checkpoint head under a named cursor ref.
    pub async fn save_cursor(&self, name: &str) -> Result<Option<Oid>, GraphError> {
        let target = self
            .store
            .read_ref(&checkpoint_head_ref(&self.graph))
            .await?;
        if let Some(sha) = &target {
            let cursor = crate::refs::cursor_saved_ref(&self.graph, name)?;
            self.store.update_ref(&cursor, sha).await?;
        }
        Ok(target)
    }

    /// Points the active cursor at a commit (checkpoint or anchor).
    pub async fn set_active_cursor(&self, sha: &Oid) -> Result<(), GraphError> {
        let cursor = crate::refs::cursor_active_ref(&self.graph);
        self.store.update_ref(&cursor, sha).await?;
        Ok(())
    }

    /// Reads the active cursor, if set.
    pub async fn active_cursor(&self) -> Result<Option<Oid>, GraphError> {
        let cursor = crate::refs::cursor_active_ref(&self.graph);
        Ok(self.store.read_ref(&cursor).await?)
    }
}
