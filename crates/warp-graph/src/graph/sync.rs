// SPDX-License-Identifier: Apache-2.0
//! Sync protocol: frontier exchange and per-writer chain tails.
//!
//! The requester sends its frontier; the responder walks each local writer
//! chain back from its tip until it reaches the requester's recorded tip (or
//! the chain origin) and returns the missing patches, oldest first. Patches
//! travel as hex-encoded canonical CBOR inside the JSON envelope, so the
//! response canonicalizes trivially and the blob bytes survive transport
//! byte-for-byte.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;
use warp_store::Oid;

use crate::frontier::Frontier;
use crate::ident::WriterId;
use crate::patch::{assert_ops_compatible, Patch, PatchError};
use crate::reduce::{reduce_sorted, sort_causally, PatchEntry};

use super::materialize::walk_writer_chain;
use super::{GraphError, WarpGraph};

/// Wire tag of a sync request.
pub const SYNC_REQUEST_TYPE: &str = "sync-request";
/// Wire tag of a sync response.
pub const SYNC_RESPONSE_TYPE: &str = "sync-response";

/// A frontier-exchange request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRequest {
    /// Always [`SYNC_REQUEST_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Requester's frontier: `writer → tip sha`.
    pub frontier: BTreeMap<String, String>,
}

/// One transferred patch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncPatch {
    /// Writer the patch belongs to.
    #[serde(rename = "writerId")]
    pub writer_id: String,
    /// Sha of the patch commit.
    pub sha: String,
    /// Hex-encoded canonical CBOR of the patch.
    pub patch: String,
}

/// A frontier-exchange response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResponse {
    /// Always [`SYNC_RESPONSE_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Responder's frontier.
    pub frontier: BTreeMap<String, String>,
    /// Patches the requester was missing, oldest first per writer.
    pub patches: Vec<SyncPatch>,
}

/// What applying a sync response did.
#[derive(Debug, Clone)]
pub struct AppliedSync {
    /// Number of patches folded into the cached state.
    pub applied: usize,
}

/// `true` iff any tip differs between the two frontiers (including writers
/// present on only one side).
#[must_use]
pub fn sync_needed(local: &Frontier, remote: &BTreeMap<String, String>) -> bool {
    if local.len() != remote.len() {
        return true;
    }
    local.iter().any(|(writer, sha)| {
        remote
            .get(writer.as_str())
            .is_none_or(|remote_sha| remote_sha != sha.as_str())
    })
}

fn frontier_to_wire(frontier: &Frontier) -> BTreeMap<String, String> {
    frontier
        .iter()
        .map(|(w, sha)| (w.as_str().to_owned(), sha.as_str().to_owned()))
        .collect()
}

impl WarpGraph {
    /// Builds a sync request carrying the current frontier.
    pub async fn build_sync_request(&self) -> Result<SyncRequest, GraphError> {
        let frontier = self.scan_frontier().await?;
        Ok(SyncRequest {
            kind: SYNC_REQUEST_TYPE.to_owned(),
            frontier: frontier_to_wire(&frontier),
        })
    }

    /// Answers a peer's sync request with the chain tails it is missing.
    pub async fn handle_sync_request(
        &self,
        request: &SyncRequest,
    ) -> Result<SyncResponse, GraphError> {
        if request.kind != SYNC_REQUEST_TYPE {
            return Err(GraphError::Patch(PatchError::Malformed(format!(
                "unexpected sync request type {:?}",
                request.kind
            ))));
        }
        let frontier = self.scan_frontier().await?;
        let mut patches = Vec::new();
        for (writer, tip) in &frontier {
            let remote_tip = match request.frontier.get(writer.as_str()) {
                Some(sha) if sha == tip.as_str() => continue,
                Some(sha) => Some(Oid::parse(sha).map_err(GraphError::Store)?),
                None => None,
            };
            let tail = walk_writer_chain(
                self.store.as_ref(),
                &self.graph,
                tip,
                remote_tip.as_ref(),
                None,
                self.options.max_schema,
            )
            .await?;
            for entry in tail {
                patches.push(SyncPatch {
                    writer_id: writer.as_str().to_owned(),
                    sha: entry.sha.as_str().to_owned(),
                    patch: hex::encode(entry.patch.encode()?),
                });
            }
        }
        Ok(SyncResponse {
            kind: SYNC_RESPONSE_TYPE.to_owned(),
            frontier: frontier_to_wire(&frontier),
            patches,
        })
    }

    /// `true` iff this replica needs patches from a peer at `remote`.
    pub async fn sync_needed_with(
        &self,
        remote: &BTreeMap<String, String>,
    ) -> Result<bool, GraphError> {
        let local = self.scan_frontier().await?;
        Ok(sync_needed(&local, remote))
    }

    /// Applies a peer's sync response to the cached state.
    ///
    /// Requires a cached state (`E_NO_STATE` otherwise). Incoming patches
    /// fold through the join reducer; the incoming frontier merges into
    /// `last_frontier`; the dirty flag clears.
    pub async fn apply_sync_response(
        &mut self,
        response: &SyncResponse,
    ) -> Result<AppliedSync, GraphError> {
        if response.kind != SYNC_RESPONSE_TYPE {
            return Err(GraphError::Patch(PatchError::Malformed(format!(
                "unexpected sync response type {:?}",
                response.kind
            ))));
        }
        if self.cached.is_none() {
            return Err(GraphError::NoState);
        }

        // Decode and validate before touching state or refs.
        let mut entries = Vec::with_capacity(response.patches.len());
        for wire in &response.patches {
            let sha = Oid::parse(&wire.sha).map_err(GraphError::Store)?;
            let bytes = hex::decode(&wire.patch)
                .map_err(|e| GraphError::Patch(PatchError::Malformed(e.to_string())))?;
            let patch = Patch::decode(&bytes)?;
            assert_ops_compatible(&patch.ops, self.options.max_schema)?;
            if patch.writer.as_str() != wire.writer_id {
                return Err(GraphError::Patch(PatchError::Malformed(format!(
                    "patch writer {:?} does not match envelope writer {:?}",
                    patch.writer.as_str(),
                    wire.writer_id
                ))));
            }
            entries.push(PatchEntry::new(patch, sha));
        }
        sort_causally(&mut entries);

        // Persist the transferred commits locally: recreate each patch
        // commit on the writer's chain and advance its ref.
        let mut per_writer_tip: BTreeMap<WriterId, Oid> = BTreeMap::new();
        for entry in &entries {
            let writer = entry.patch.writer.clone();
            let writer_ref = crate::refs::writer_ref(&self.graph, &writer);
            let parent = match per_writer_tip.get(&writer) {
                Some(tip) => Some(tip.clone()),
                None => self.store.read_ref(&writer_ref).await?,
            };
            let patch_oid = self.store.write_blob(&entry.patch.encode()?).await?;
            let message = crate::message::CommitMessage::Patch(crate::message::PatchMessage {
                graph: self.graph.clone(),
                writer: writer.clone(),
                lamport: entry.patch.lamport,
                patch_oid,
                schema: entry.patch.schema,
            })
            .render();
            let parents: Vec<Oid> = parent.into_iter().collect();
            let sha = self.store.commit_node(&message, &parents, false).await?;
            self.store.update_ref(&writer_ref, &sha).await?;
            per_writer_tip.insert(writer, sha);
        }

        let applied = entries.len();
        let max_lamport = entries.iter().map(|e| e.patch.lamport).max().unwrap_or(0);
        if let Some(cached) = self.cached.as_mut() {
            let state = std::mem::take(&mut cached.state);
            let outcome = reduce_sorted(state, &entries, false);
            cached.state = outcome.state;
            if let Some(index) = cached.index.as_mut() {
                index.merge(&outcome.index);
            }
        }
        for (writer, sha) in per_writer_tip {
            self.last_frontier.insert(writer, sha);
        }
        self.state_dirty = false;
        self.observed_max_lamport = self.observed_max_lamport.max(max_lamport);
        self.patches_since_checkpoint += u64::try_from(applied).unwrap_or(u64::MAX);

        info!(graph = %self.graph, applied, "applied sync response");
        Ok(AppliedSync { applied })
    }
}
