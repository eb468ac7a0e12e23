// SPDX-License-Identifier: Apache-2.0
//! Materialized graph state and its canonical serializations.
//!
//! [`WarpState`] is the join of all applied patches: OR-Sets for node and
//! edge membership, LWW registers for properties, and the version vector of
//! observed dots. Two serializations exist:
//!
//! - the **visible projection** — nodes, visible edges, and node properties,
//!   canonically encoded and hashed by [`WarpState::compute_state_hash_v5`].
//!   This is what replicas compare.
//! - the **full state** — CRDT interior included (live/tombstone dots,
//!   version vector, LWW metadata), used for BTR `U0` payloads, checkpoint
//!   blobs, and seek-cache entries, so replay from a serialized state
//!   reproduces the exact interior.
//!
//! Visibility invariant: an edge is visible iff it is present in the edge
//! set *and* both endpoints are visible nodes; a node property is visible
//! iff its node is visible.

use std::collections::BTreeMap;

use ciborium::value::Value;
use sha2::{Digest, Sha256};

use crate::canonical::{self, map, CodecError};
use crate::crdt::{Dot, LwwRegister, LwwUpdate, OrSet, VersionVector};
use crate::ident::{Lamport, WriterId};
use crate::keys::{EdgeKey, PropTarget};
use crate::wire;

/// State serialization format version.
pub const STATE_VERSION: &str = "v5";

/// Materialized CRDT state of one graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarpState {
    nodes: OrSet<String>,
    edges: OrSet<String>,
    props: BTreeMap<(String, String), LwwRegister>,
    version_vector: VersionVector,
}

impl WarpState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // --- Mutation (driven by the join reducer) ---------------------------

    /// Applies a node add event. Returns `true` when the node was already
    /// visible (the add is redundant).
    pub fn add_node(&mut self, node: String, dot: Dot) -> bool {
        self.version_vector.observe(&dot.writer, dot.seq);
        self.nodes.add(node, dot)
    }

    /// Tombstones observed node add events.
    pub fn tombstone_node(&mut self, node: &str, observed: Vec<Dot>) {
        self.nodes.remove(&node.to_owned(), observed);
    }

    /// Applies an edge add event. Returns `true` when the edge was already
    /// visible in the membership set.
    pub fn add_edge(&mut self, edge: &EdgeKey, dot: Dot) -> bool {
        self.version_vector.observe(&dot.writer, dot.seq);
        self.edges.add(edge.encode(), dot)
    }

    /// Tombstones observed edge add events.
    pub fn tombstone_edge(&mut self, edge: &EdgeKey, observed: Vec<Dot>) {
        self.edges.remove(&edge.encode(), observed);
    }

    /// Offers a property write to the target's LWW register.
    pub fn set_prop(
        &mut self,
        target: &PropTarget,
        key: &str,
        value: Value,
        lamport: Lamport,
        writer: &WriterId,
        seq: u64,
    ) -> LwwUpdate {
        self.version_vector.observe(writer, seq);
        let map_key = (target.encode(), key.to_owned());
        match self.props.get_mut(&map_key) {
            Some(register) => register.offer(value, lamport, writer, seq),
            None => {
                self.props.insert(
                    map_key,
                    LwwRegister::new(value, lamport, writer.clone(), seq),
                );
                LwwUpdate::Applied
            }
        }
    }

    // --- Queries ---------------------------------------------------------

    /// `true` iff the node is visible.
    #[must_use]
    pub fn has_node(&self, node: &str) -> bool {
        self.nodes.contains(&node.to_owned())
    }

    /// `true` iff the edge is visible: present in the membership set with
    /// both endpoints visible.
    #[must_use]
    pub fn has_edge(&self, edge: &EdgeKey) -> bool {
        self.edges.contains(&edge.encode()) && self.has_node(&edge.from) && self.has_node(&edge.to)
    }

    /// Visible node ids in sorted order.
    #[must_use]
    pub fn visible_nodes(&self) -> Vec<String> {
        self.nodes.present().cloned().collect()
    }

    /// Visible edges, sorted by `(from, to, label)`.
    #[must_use]
    pub fn visible_edges(&self) -> Vec<EdgeKey> {
        let mut edges: Vec<EdgeKey> = self
            .edges
            .present()
            .filter_map(|encoded| EdgeKey::decode(encoded).ok())
            .filter(|e| self.has_node(&e.from) && self.has_node(&e.to))
            .collect();
        edges.sort();
        edges
    }

    /// Visible properties of a node, in key order. Empty when the node is
    /// not visible.
    #[must_use]
    pub fn node_props(&self, node: &str) -> BTreeMap<String, Value> {
        if !self.has_node(node) {
            return BTreeMap::new();
        }
        self.props
            .range((node.to_owned(), String::new())..)
            .take_while(|((target, _), _)| target == node)
            .map(|((_, key), register)| (key.clone(), register.value.clone()))
            .collect()
    }

    /// Properties of a visible edge, in key order.
    #[must_use]
    pub fn edge_props(&self, edge: &EdgeKey) -> BTreeMap<String, Value> {
        if !self.has_edge(edge) {
            return BTreeMap::new();
        }
        let target = PropTarget::Edge(edge.clone()).encode();
        self.props
            .range((target.clone(), String::new())..)
            .take_while(|((t, _), _)| *t == target)
            .map(|((_, key), register)| (key.clone(), register.value.clone()))
            .collect()
    }

    /// Visible neighbors of `node` (targets of outgoing visible edges),
    /// sorted and deduplicated.
    #[must_use]
    pub fn neighbors(&self, node: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .visible_edges()
            .into_iter()
            .filter(|e| e.from == node)
            .map(|e| e.to)
            .collect();
        out.dedup();
        out
    }

    /// The version vector of all observed dots.
    #[must_use]
    pub fn version_vector(&self) -> &VersionVector {
        &self.version_vector
    }

    /// The node's interior dot bookkeeping, if any event ever touched it.
    #[must_use]
    pub fn node_dots(&self, node: &str) -> Option<&crate::crdt::DotSet> {
        self.nodes.dots(&node.to_owned())
    }

    /// The edge's interior dot bookkeeping, if any event ever touched it.
    #[must_use]
    pub fn edge_dots(&self, edge: &EdgeKey) -> Option<&crate::crdt::DotSet> {
        self.edges.dots(&edge.encode())
    }

    /// Ratio of tombstoned dots to all dots (0.0 for an empty state).
    ///
    /// Precision loss on the casts is irrelevant for an advisory ratio.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tombstone_ratio(&self) -> f64 {
        let live = self.nodes.live_count() + self.edges.live_count();
        let dead = self.nodes.tombstone_count() + self.edges.tombstone_count();
        let total = live + dead;
        if total == 0 {
            return 0.0;
        }
        dead as f64 / total as f64
    }

    // --- Visible projection & state hash ---------------------------------

    /// Canonical visible projection: `{ nodes, edges, props }` with every
    /// sequence sorted.
    #[must_use]
    pub fn visible_projection(&self) -> Value {
        let nodes: Vec<Value> = self
            .visible_nodes()
            .into_iter()
            .map(Value::Text)
            .collect();
        let edges: Vec<Value> = self
            .visible_edges()
            .into_iter()
            .map(|e| {
                map(vec![
                    ("from", Value::Text(e.from)),
                    ("label", Value::Text(e.label)),
                    ("to", Value::Text(e.to)),
                ])
            })
            .collect();
        let mut props: Vec<Value> = Vec::new();
        for node in self.visible_nodes() {
            for (key, value) in self.node_props(&node) {
                props.push(map(vec![
                    ("key", Value::Text(key)),
                    ("node", Value::Text(node.clone())),
                    ("value", value),
                ]));
            }
        }
        map(vec![
            ("edges", Value::Array(edges)),
            ("nodes", Value::Array(nodes)),
            ("props", Value::Array(props)),
        ])
    }

    /// Hex SHA-256 of the canonical encoding of the visible projection.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] only if a stored property value is not
    /// canonically encodable, which decode-validated inputs cannot produce.
    pub fn compute_state_hash_v5(&self) -> Result<String, CodecError> {
        let bytes = canonical::encode_value(&self.visible_projection())?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    // --- Full-state serialization ----------------------------------------

    /// Maps the full state (CRDT interior included) to its canonical value.
    #[must_use]
    pub fn to_full_value(&self) -> Value {
        let nodes = orset_to_value(&self.nodes);
        let edges = orset_to_value(&self.edges);
        let props: Vec<Value> = self
            .props
            .iter()
            .map(|((target, key), register)| {
                map(vec![
                    ("key", Value::Text(key.clone())),
                    ("lamport", Value::Integer(register.lamport.into())),
                    ("seq", Value::Integer(register.seq.into())),
                    ("target", Value::Text(target.clone())),
                    ("value", register.value.clone()),
                    (
                        "writer",
                        Value::Text(register.writer.as_str().to_owned()),
                    ),
                ])
            })
            .collect();
        let vv = Value::Map(
            self.version_vector
                .iter()
                .map(|(w, seq)| {
                    (
                        Value::Text(w.as_str().to_owned()),
                        Value::Integer(seq.into()),
                    )
                })
                .collect(),
        );
        map(vec![
            ("edges", edges),
            ("nodes", nodes),
            ("props", Value::Array(props)),
            ("version", Value::Text(STATE_VERSION.to_owned())),
            ("vv", vv),
        ])
    }

    /// Restores a state from its full-value form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for shape violations or invalid identifiers.
    pub fn from_full_value(value: &Value) -> Result<Self, CodecError> {
        let version = wire::get_text(value, "version")?;
        if version != STATE_VERSION {
            return Err(wire::bad(&format!("unsupported state version {version:?}")));
        }
        let mut state = Self::new();
        orset_from_value(wire::get(value, "nodes")?, &mut state.nodes)?;
        orset_from_value(wire::get(value, "edges")?, &mut state.edges)?;
        for entry in wire::get_array(value, "props")? {
            let target = wire::get_text(entry, "target")?.to_owned();
            let key = wire::get_text(entry, "key")?.to_owned();
            let lamport = wire::get_u64(entry, "lamport")?;
            let seq = wire::get_u64(entry, "seq")?;
            let writer = WriterId::parse(wire::get_text(entry, "writer")?)
                .map_err(|e| wire::bad(&e.to_string()))?;
            let register =
                LwwRegister::new(wire::get(entry, "value")?.clone(), lamport, writer, seq);
            state.props.insert((target, key), register);
        }
        for (k, v) in wire::get_map_entries(value, "vv")? {
            let writer = WriterId::parse(wire::as_text(k, "vv key")?)
                .map_err(|e| wire::bad(&e.to_string()))?;
            state
                .version_vector
                .observe(&writer, wire::as_u64(v, "vv seq")?);
        }
        Ok(state)
    }

    /// Encodes the full state to canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if a stored property value is not encodable.
    pub fn encode_full(&self) -> Result<Vec<u8>, CodecError> {
        canonical::encode_value(&self.to_full_value())
    }

    /// Decodes a full state from canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for codec or shape violations.
    pub fn decode_full(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_full_value(&canonical::decode_value(bytes)?)
    }
}

fn dot_value(dot: &Dot) -> Value {
    map(vec![
        ("seq", Value::Integer(dot.seq.into())),
        ("writer", Value::Text(dot.writer.as_str().to_owned())),
    ])
}

fn dot_from(value: &Value) -> Result<Dot, CodecError> {
    let writer = WriterId::parse(wire::get_text(value, "writer")?)
        .map_err(|e| wire::bad(&e.to_string()))?;
    Ok(Dot::new(writer, wire::get_u64(value, "seq")?))
}

fn orset_to_value(set: &OrSet<String>) -> Value {
    let entries: Vec<Value> = set
        .iter_raw()
        .map(|(key, dots)| {
            map(vec![
                ("id", Value::Text(key.clone())),
                (
                    "live",
                    Value::Array(dots.live().iter().map(dot_value).collect()),
                ),
                (
                    "tombstones",
                    Value::Array(dots.tombstones().iter().map(dot_value).collect()),
                ),
            ])
        })
        .collect();
    Value::Array(entries)
}

fn orset_from_value(value: &Value, set: &mut OrSet<String>) -> Result<(), CodecError> {
    let Value::Array(entries) = value else {
        return Err(wire::bad("or-set must be an array"));
    };
    for entry in entries {
        let id = wire::get_text(entry, "id")?.to_owned();
        let live = wire::get_array(entry, "live")?
            .iter()
            .map(dot_from)
            .collect::<Result<_, _>>()?;
        let tombstones = wire::get_array(entry, "tombstones")?
            .iter()
            .map(dot_from)
            .collect::<Result<_, _>>()?;
        set.restore(id, live, tombstones);
    }
    Ok(())
}
