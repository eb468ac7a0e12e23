// SPDX-License-Identifier: Apache-2.0
//! Backward causal cone slicing.
//!
//! The cone of a node is the set of patches that transitively contributed to
//! its current state: a BFS over the provenance index, expanding each
//! patch's declared read dependencies. Loaded patches are cached by sha so
//! no commit or blob is read twice. The collected set is sorted causally and
//! replayed from the empty state.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;
use warp_store::Oid;

use crate::message::CommitMessage;
use crate::patch::Patch;
use crate::payload::ProvenancePayload;
use crate::reduce::{sort_causally, PatchEntry};
use crate::state::WarpState;

use super::{GraphError, WarpGraph};

/// Result of materializing a causal cone.
#[derive(Debug, Clone)]
pub struct SliceResult {
    /// State replayed from the cone's patches only.
    pub state: WarpState,
    /// The cone as a replayable payload (causal order).
    pub payload: ProvenancePayload,
    /// Number of patches in the cone.
    pub patch_count: usize,
}

impl WarpGraph {
    /// Ordered patch shas that wrote to `entity`.
    ///
    /// Requires full provenance: after a seek-cache restore this fails with
    /// `E_PROVENANCE_DEGRADED` until the next full materialize.
    pub async fn patches_for(&mut self, entity: &str) -> Result<Vec<Oid>, GraphError> {
        self.ensure_fresh_for_provenance().await?;
        let Some(cached) = self.cached.as_ref() else {
            return Err(GraphError::NoState);
        };
        let Some(index) = cached.index.as_ref() else {
            return Err(GraphError::ProvenanceDegraded);
        };
        Ok(index
            .patches_for(entity)
            .map_or_else(Vec::new, <[Oid]>::to_vec))
    }

    /// Materializes the backward causal cone of `node`.
    pub async fn materialize_slice(&mut self, node: &str) -> Result<SliceResult, GraphError> {
        self.ensure_fresh_for_provenance().await?;
        let Some(cached) = self.cached.as_ref() else {
            return Err(GraphError::NoState);
        };
        let Some(index) = cached.index.as_ref() else {
            return Err(GraphError::ProvenanceDegraded);
        };

        // BFS over entities; each entity pulls the patches that wrote to it,
        // and each patch enqueues its declared reads.
        let mut patch_cache: BTreeMap<Oid, Patch> = BTreeMap::new();
        let mut visited_entities: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(node.to_owned());
        visited_entities.insert(node.to_owned());

        while let Some(entity) = queue.pop_front() {
            let Some(shas) = index.patches_for(&entity) else {
                continue;
            };
            for sha in shas {
                if !patch_cache.contains_key(sha) {
                    let patch = self.load_patch(sha).await?;
                    patch_cache.insert(sha.clone(), patch);
                }
                // patch_cache holds every sha inserted above.
                if let Some(patch) = patch_cache.get(sha) {
                    for read in &patch.reads {
                        if visited_entities.insert(read.clone()) {
                            queue.push_back(read.clone());
                        }
                    }
                }
            }
        }

        let mut entries: Vec<PatchEntry> = patch_cache
            .into_iter()
            .map(|(sha, patch)| PatchEntry::new(patch, sha))
            .collect();
        sort_causally(&mut entries);
        let patch_count = entries.len();
        let payload = ProvenancePayload::new(entries);
        let state = payload.replay(WarpState::new()).state;

        debug!(graph = %self.graph, node, patch_count, "materialized causal cone");
        Ok(SliceResult {
            state,
            payload,
            patch_count,
        })
    }

    // Provenance reads demand a fresh cache but must not silently accept a
    // degraded one; the degraded check happens at the call sites above.
    async fn ensure_fresh_for_provenance(&mut self) -> Result<(), GraphError> {
        if self.cached.is_none() {
            if self.options.auto_materialize {
                self.materialize(super::MaterializeOptions::default()).await?;
            } else {
                return Err(GraphError::NoState);
            }
        }
        if self.state_dirty || self.has_frontier_changed().await? {
            if self.options.auto_materialize {
                self.materialize(super::MaterializeOptions::default()).await?;
            } else {
                self.state_dirty = true;
                return Err(GraphError::StaleState);
            }
        }
        Ok(())
    }

    // Loads one patch by its commit sha.
    async fn load_patch(&self, sha: &Oid) -> Result<Patch, GraphError> {
        let info = self.store.get_node_info(sha).await?;
        let Ok(CommitMessage::Patch(header)) = CommitMessage::parse(&info.message) else {
            return Err(GraphError::Corrupt(format!(
                "provenance index references non-patch commit {sha}"
            )));
        };
        let bytes = self.store.read_blob(&header.patch_oid).await?;
        Patch::decode(&bytes)
            .map_err(|e| GraphError::Corrupt(format!("patch blob {}: {e}", header.patch_oid)))
    }
}
