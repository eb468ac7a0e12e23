// SPDX-License-Identifier: Apache-2.0
//! Patch building and commit.
//!
//! [`PatchBuilder`] owns an ordered vector of ops; `commit` consumes it,
//! canonically encodes the ops, writes the patch blob, creates the commit,
//! and advances the writer ref. The cached state and `last_frontier` are
//! advanced eagerly, so a local commit never marks the cache stale.

use ciborium::value::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use warp_store::Oid;

use crate::crdt::Dot;
use crate::ident::Lamport;
use crate::keys::{EdgeKey, PropTarget};
use crate::message::{AuditMessage, CommitMessage, PatchMessage};
use crate::patch::{assert_ops_compatible, detect_schema_version, Op, Patch, PatchError};
use crate::reduce::{reduce_sorted, PatchEntry};

use super::{GraphError, MaterializeOptions, WarpGraph};

/// What a successful commit produced.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// Sha of the new patch commit.
    pub sha: Oid,
    /// Blob oid of the canonical patch encoding.
    pub patch_oid: Oid,
    /// Lamport timestamp assigned to the patch.
    pub lamport: Lamport,
    /// Schema version the ops required.
    pub schema: u32,
    /// Sha of the audit commit, when the builder opted in.
    pub audit_sha: Option<Oid>,
}

/// Builder for one patch: an ordered op vector plus recorded reads.
///
/// Obtained from [`WarpGraph::create_patch`]; consumed by
/// [`PatchBuilder::commit`].
pub struct PatchBuilder<'g> {
    graph: &'g mut WarpGraph,
    ops: Vec<Op>,
    reads: Vec<String>,
    audit: bool,
    // Dots allocated in this patch, beyond what the cached state has
    // observed for the local writer.
    allocated: u64,
}

impl<'g> PatchBuilder<'g> {
    fn next_dot(&mut self) -> Dot {
        let base = self
            .graph
            .cached
            .as_ref()
            .map_or(0, |c| c.state.version_vector().get(&self.graph.writer));
        self.allocated += 1;
        Dot::new(self.graph.writer.clone(), base + self.allocated)
    }

    /// Adds a node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Key`] for ids containing reserved bytes.
    pub fn add_node(mut self, node: &str) -> Result<Self, GraphError> {
        // Validate through the prop-target codec: node ids share its charset.
        PropTarget::node(node)?;
        let dot = self.next_dot();
        self.ops.push(Op::NodeAdd {
            node: node.to_owned(),
            dot,
        });
        Ok(self)
    }

    /// Removes a node by tombstoning every dot currently visible for it.
    pub fn remove_node(mut self, node: &str) -> Result<Self, GraphError> {
        let observed = self.observed_node_dots(node);
        self.ops.push(Op::NodeTombstone {
            node: node.to_owned(),
            observed,
        });
        Ok(self)
    }

    /// Adds an edge.
    pub fn add_edge(mut self, from: &str, to: &str, label: &str) -> Result<Self, GraphError> {
        let edge = EdgeKey::new(from, to, label)?;
        let dot = self.next_dot();
        self.ops.push(Op::EdgeAdd { edge, dot });
        Ok(self)
    }

    /// Removes an edge by tombstoning every dot currently visible for it.
    pub fn remove_edge(mut self, from: &str, to: &str, label: &str) -> Result<Self, GraphError> {
        let edge = EdgeKey::new(from, to, label)?;
        let observed = self.observed_edge_dots(&edge);
        self.ops.push(Op::EdgeTombstone { edge, observed });
        Ok(self)
    }

    /// Sets a property on a node.
    pub fn set_node_prop(mut self, node: &str, key: &str, value: Value) -> Result<Self, GraphError> {
        let target = PropTarget::node(node)?;
        let dot = self.next_dot();
        self.ops.push(Op::PropSet {
            target,
            key: key.to_owned(),
            value,
            dot,
        });
        Ok(self)
    }

    /// Sets a property on an edge (requires schema 3 at commit time).
    pub fn set_edge_prop(
        mut self,
        from: &str,
        to: &str,
        label: &str,
        key: &str,
        value: Value,
    ) -> Result<Self, GraphError> {
        let target = PropTarget::Edge(EdgeKey::new(from, to, label)?);
        let dot = self.next_dot();
        self.ops.push(Op::PropSet {
            target,
            key: key.to_owned(),
            value,
            dot,
        });
        Ok(self)
    }

    /// Records a read dependency (consumed by backward causal cones).
    #[must_use]
    pub fn record_read(mut self, entity: &str) -> Self {
        self.reads.push(entity.to_owned());
        self
    }

    /// Opts this commit into the audit trail: a second commit carrying the
    /// ops digest is created alongside the patch commit.
    #[must_use]
    pub fn with_audit(mut self) -> Self {
        self.audit = true;
        self
    }

    /// Number of ops queued so far.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    fn observed_node_dots(&self, node: &str) -> Vec<Dot> {
        self.graph
            .cached
            .as_ref()
            .and_then(|c| c.state.node_dots(node))
            .map_or_else(Vec::new, |ds| ds.visible_dots().cloned().collect())
    }

    fn observed_edge_dots(&self, edge: &EdgeKey) -> Vec<Dot> {
        self.graph
            .cached
            .as_ref()
            .and_then(|c| c.state.edge_dots(edge))
            .map_or_else(Vec::new, |ds| ds.visible_dots().cloned().collect())
    }

    /// Validates, encodes, and commits the patch.
    ///
    /// The assigned lamport is `max(observed lamports, parent lamport) + 1`;
    /// the patch context is the cached state's version vector.
    pub async fn commit(self) -> Result<CommitReceipt, GraphError> {
        let Self {
            graph,
            ops,
            reads,
            audit,
            ..
        } = self;

        if ops.is_empty() {
            return Err(GraphError::Patch(PatchError::Malformed(
                "empty patch: no ops queued".into(),
            )));
        }
        assert_ops_compatible(&ops, graph.options.max_schema)?;
        let schema = detect_schema_version(&ops);

        // Parent tip and its lamport keep the chain monotone even when the
        // cached view lags.
        let writer_ref = crate::refs::writer_ref(&graph.graph, &graph.writer);
        let parent = graph.store.read_ref(&writer_ref).await?;
        let parent_lamport = match &parent {
            Some(sha) => {
                let info = graph.store.get_node_info(sha).await?;
                match CommitMessage::parse(&info.message) {
                    Ok(CommitMessage::Patch(header)) => header.lamport,
                    _ => 0,
                }
            }
            None => 0,
        };
        let lamport = graph.observed_max_lamport.max(parent_lamport) + 1;

        let context = graph
            .cached
            .as_ref()
            .map(|c| c.state.version_vector().clone())
            .unwrap_or_default();

        let patch = Patch {
            schema,
            writer: graph.writer.clone(),
            lamport,
            context,
            ops,
            reads,
        };
        let patch_bytes = patch.encode()?;
        let patch_oid = graph.store.write_blob(&patch_bytes).await?;

        let message = CommitMessage::Patch(PatchMessage {
            graph: graph.graph.clone(),
            writer: graph.writer.clone(),
            lamport,
            patch_oid: patch_oid.clone(),
            schema,
        })
        .render();
        let parents: Vec<Oid> = parent.into_iter().collect();
        let sha = graph.store.commit_node(&message, &parents, false).await?;
        graph.store.update_ref(&writer_ref, &sha).await?;

        let audit_sha = if audit {
            Some(graph.commit_audit(&patch, &sha, schema).await?)
        } else {
            None
        };

        // Eager cache advance: fold the new patch into the cached state so
        // has_frontier_changed stays false after a local commit.
        if let Some(cached) = graph.cached.as_mut() {
            let entry = PatchEntry::new(patch, sha.clone());
            let state = std::mem::take(&mut cached.state);
            let outcome = reduce_sorted(state, std::slice::from_ref(&entry), false);
            cached.state = outcome.state;
            if let Some(index) = cached.index.as_mut() {
                for op in &entry.patch.ops {
                    index.record(&op.target_entity(), &sha);
                }
            }
        }
        graph.last_frontier.insert(graph.writer.clone(), sha.clone());
        graph.observed_max_lamport = lamport;
        graph.patches_since_checkpoint += 1;

        info!(
            graph = %graph.graph,
            writer = %graph.writer,
            lamport,
            sha = %sha,
            schema,
            "committed patch"
        );
        Ok(CommitReceipt {
            sha,
            patch_oid,
            lamport,
            schema,
            audit_sha,
        })
    }
}

impl WarpGraph {
    /// Starts building a patch.
    ///
    /// When no state is cached yet, the graph materializes first so dots,
    /// contexts, and tombstones are allocated against current history.
    pub async fn create_patch(&mut self) -> Result<PatchBuilder<'_>, GraphError> {
        if self.cached.is_none() || self.state_dirty {
            self.materialize(MaterializeOptions::default()).await?;
        }
        Ok(PatchBuilder {
            graph: self,
            ops: Vec::new(),
            reads: Vec::new(),
            audit: false,
            allocated: 0,
        })
    }

    // Creates the audit commit for a just-committed patch.
    async fn commit_audit(
        &self,
        patch: &Patch,
        data_commit: &Oid,
        schema: u32,
    ) -> Result<Oid, GraphError> {
        let digest = ops_digest(&patch.ops)?;
        let message = CommitMessage::Audit(AuditMessage {
            graph: self.graph.clone(),
            writer: self.writer.clone(),
            data_commit: data_commit.clone(),
            ops_digest: digest,
            schema,
        })
        .render();
        let sha = self
            .store
            .commit_node(&message, std::slice::from_ref(data_commit), false)
            .await?;
        debug!(graph = %self.graph, data_commit = %data_commit, "committed audit record");
        Ok(sha)
    }
}

/// Computes the audit ops digest:
/// `sha256Hex("git-warp:opsDigest:v1\0" || canonicalJson(ops))`.
///
/// Canonical JSON uses sorted keys, raw UTF-8, and standard JSON escapes
/// (control characters as `\u0000`-style sequences).
pub fn ops_digest(ops: &[Op]) -> Result<String, GraphError> {
    let json_ops: Vec<serde_json::Value> = ops
        .iter()
        .map(|op| cbor_to_json(&crate::patch::op_to_value(op)))
        .collect::<Result<_, _>>()?;
    let json = serde_json::to_string(&serde_json::Value::Array(json_ops))
        .map_err(|e| GraphError::Corrupt(format!("ops digest serialization: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(b"git-warp:opsDigest:v1\0");
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

// Canonical-JSON conversion for audit digests. Property values are the only
// open-ended inputs; binary values have no JSON form and are rejected.
fn cbor_to_json(value: &Value) -> Result<serde_json::Value, GraphError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Integer(n) => {
            let n = i128::from(*n);
            i64::try_from(n)
                .map(|v| serde_json::Value::Number(v.into()))
                .map_err(|_| GraphError::Corrupt("integer exceeds JSON range".into()))
        }
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| GraphError::Corrupt("non-finite float in ops".into())),
        Value::Text(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Array(items) => Ok(serde_json::Value::Array(
            items.iter().map(cbor_to_json).collect::<Result<_, _>>()?,
        )),
        Value::Map(entries) => {
            // serde_json maps are BTreeMap-backed: keys serialize sorted.
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                let Value::Text(key) = k else {
                    return Err(GraphError::Corrupt("non-text map key in ops".into()));
                };
                out.insert(key.clone(), cbor_to_json(v)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        _ => Err(GraphError::Corrupt(
            "value kind has no canonical JSON form".into(),
        )),
    }
}
