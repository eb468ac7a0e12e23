// SPDX-License-Identifier: Apache-2.0
//! Patch wire objects: ops, contexts, schema detection.
//!
//! A patch is the replayable boundary artifact of one write: a causally
//! tagged, canonically encoded list of [`Op`]s. Schema 2 covers node ops,
//! edge membership, and node properties; schema 3 additionally permits
//! property operations on edges.

use ciborium::value::Value;
use thiserror::Error;

use crate::canonical::{self, map, CodecError};
use crate::crdt::{Dot, VersionVector};
use crate::ident::{is_writer_id, IdentError, Lamport, WriterId};
use crate::keys::{EdgeKey, KeyError, PropTarget};
use crate::wire;

/// Baseline schema: node ops, edge membership, node properties.
pub const SCHEMA_V2: u32 = 2;
/// Extended schema: adds edge-property operations.
pub const SCHEMA_V3: u32 = 3;

/// Errors raised while building, encoding, or decoding patches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// Canonical codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Key codec failure.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// Identifier validation failure.
    #[error(transparent)]
    Ident(#[from] IdentError),
    /// The ops require a newer schema than the reader supports.
    #[error(
        "[E_SCHEMA_UNSUPPORTED] patch requires schema {required_schema}, \
         reader supports up to {max_supported_schema}"
    )]
    SchemaUnsupported {
        /// Schema the ops actually need.
        required_schema: u32,
        /// Ceiling the reader was configured with.
        max_supported_schema: u32,
    },
    /// Structurally invalid patch.
    #[error("malformed patch: {0}")]
    Malformed(String),
}

/// One patch operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Make a node visible, tagged by `dot`.
    NodeAdd {
        /// Node id.
        node: String,
        /// Causal tag of this add event.
        dot: Dot,
    },
    /// Tombstone the observed add events of a node.
    NodeTombstone {
        /// Node id.
        node: String,
        /// Dots this removal observed.
        observed: Vec<Dot>,
    },
    /// Make an edge visible, tagged by `dot`.
    EdgeAdd {
        /// Edge triple.
        edge: EdgeKey,
        /// Causal tag of this add event.
        dot: Dot,
    },
    /// Tombstone the observed add events of an edge.
    EdgeTombstone {
        /// Edge triple.
        edge: EdgeKey,
        /// Dots this removal observed.
        observed: Vec<Dot>,
    },
    /// Set a property on a node or (schema 3) an edge.
    PropSet {
        /// Node or edge target.
        target: PropTarget,
        /// Property key.
        key: String,
        /// Property value (canonical CBOR value).
        value: Value,
        /// Causal tag of the write (drives LWW tie-breaks).
        dot: Dot,
    },
}

impl Op {
    /// Stable op name used on the wire and in receipts.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeAdd { .. } => "NodeAdd",
            Self::NodeTombstone { .. } => "NodeTombstone",
            Self::EdgeAdd { .. } => "EdgeAdd",
            Self::EdgeTombstone { .. } => "EdgeTombstone",
            Self::PropSet { .. } => "PropSet",
        }
    }

    /// Entity id the op writes to (node id or encoded edge key).
    #[must_use]
    pub fn target_entity(&self) -> String {
        match self {
            Self::NodeAdd { node, .. } | Self::NodeTombstone { node, .. } => node.clone(),
            Self::EdgeAdd { edge, .. } | Self::EdgeTombstone { edge, .. } => edge.encode(),
            Self::PropSet { target, .. } => match target {
                PropTarget::Node(id) => id.clone(),
                PropTarget::Edge(edge) => edge.encode(),
            },
        }
    }
}

/// A decoded patch: causal tags plus the op list.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// Declared schema version (2 or 3).
    pub schema: u32,
    /// Writer that produced the patch.
    pub writer: WriterId,
    /// Writer-monotone lamport timestamp.
    pub lamport: Lamport,
    /// Version vector the writer had observed at write time.
    pub context: VersionVector,
    /// Operations, applied in declared order.
    pub ops: Vec<Op>,
    /// Declared read dependencies (entity ids), consumed by causal cones.
    pub reads: Vec<String>,
}

/// Returns the schema the ops actually require: 3 if any `PropSet` targets
/// an edge, else 2.
#[must_use]
pub fn detect_schema_version(ops: &[Op]) -> u32 {
    let needs_v3 = ops
        .iter()
        .any(|op| matches!(op, Op::PropSet { target, .. } if target.is_edge()));
    if needs_v3 {
        SCHEMA_V3
    } else {
        SCHEMA_V2
    }
}

/// Rejects ops that need a newer schema than `max_schema`.
///
/// The declared schema number is deliberately not consulted: a v3-numbered
/// patch whose ops are all v2-safe remains acceptable to a v2 reader.
///
/// # Errors
///
/// Returns [`PatchError::SchemaUnsupported`] iff the ops include an
/// edge-property write and `max_schema < 3`.
pub fn assert_ops_compatible(ops: &[Op], max_schema: u32) -> Result<(), PatchError> {
    let required = detect_schema_version(ops);
    if required > max_schema {
        return Err(PatchError::SchemaUnsupported {
            required_schema: required,
            max_supported_schema: max_schema,
        });
    }
    Ok(())
}

// --- Wire codec -----------------------------------------------------------

fn dot_to_value(dot: &Dot) -> Value {
    map(vec![
        ("writer", Value::Text(dot.writer.as_str().to_owned())),
        ("seq", Value::Integer(dot.seq.into())),
    ])
}

fn dot_from_value(value: &Value) -> Result<Dot, PatchError> {
    let writer = WriterId::parse(wire::get_text(value, "writer")?)?;
    let seq = wire::get_u64(value, "seq")?;
    Ok(Dot::new(writer, seq))
}

fn dots_to_value(dots: &[Dot]) -> Value {
    Value::Array(dots.iter().map(dot_to_value).collect())
}

fn dots_from_value(value: &Value, key: &str) -> Result<Vec<Dot>, PatchError> {
    wire::get_array(value, key)?
        .iter()
        .map(dot_from_value)
        .collect()
}

pub(crate) fn op_to_value(op: &Op) -> Value {
    match op {
        Op::NodeAdd { node, dot } => map(vec![
            ("op", Value::Text("NodeAdd".into())),
            ("node", Value::Text(node.clone())),
            ("dot", dot_to_value(dot)),
        ]),
        Op::NodeTombstone { node, observed } => map(vec![
            ("op", Value::Text("NodeTombstone".into())),
            ("node", Value::Text(node.clone())),
            ("observed", dots_to_value(observed)),
        ]),
        Op::EdgeAdd { edge, dot } => map(vec![
            ("op", Value::Text("EdgeAdd".into())),
            ("from", Value::Text(edge.from.clone())),
            ("to", Value::Text(edge.to.clone())),
            ("label", Value::Text(edge.label.clone())),
            ("dot", dot_to_value(dot)),
        ]),
        Op::EdgeTombstone { edge, observed } => map(vec![
            ("op", Value::Text("EdgeTombstone".into())),
            ("from", Value::Text(edge.from.clone())),
            ("to", Value::Text(edge.to.clone())),
            ("label", Value::Text(edge.label.clone())),
            ("observed", dots_to_value(observed)),
        ]),
        Op::PropSet {
            target,
            key,
            value,
            dot,
        } => map(vec![
            ("op", Value::Text("PropSet".into())),
            ("target", Value::Text(target.encode())),
            ("key", Value::Text(key.clone())),
            ("value", value.clone()),
            ("dot", dot_to_value(dot)),
        ]),
    }
}

fn edge_from_value(value: &Value) -> Result<EdgeKey, PatchError> {
    Ok(EdgeKey::new(
        wire::get_text(value, "from")?,
        wire::get_text(value, "to")?,
        wire::get_text(value, "label")?,
    )?)
}

fn op_from_value(value: &Value) -> Result<Op, PatchError> {
    let kind = wire::get_text(value, "op")?;
    match kind {
        "NodeAdd" => Ok(Op::NodeAdd {
            node: wire::get_text(value, "node")?.to_owned(),
            dot: dot_from_value(wire::get(value, "dot")?)?,
        }),
        "NodeTombstone" => Ok(Op::NodeTombstone {
            node: wire::get_text(value, "node")?.to_owned(),
            observed: dots_from_value(value, "observed")?,
        }),
        "EdgeAdd" => Ok(Op::EdgeAdd {
            edge: edge_from_value(value)?,
            dot: dot_from_value(wire::get(value, "dot")?)?,
        }),
        "EdgeTombstone" => Ok(Op::EdgeTombstone {
            edge: edge_from_value(value)?,
            observed: dots_from_value(value, "observed")?,
        }),
        "PropSet" => Ok(Op::PropSet {
            target: PropTarget::decode(wire::get_text(value, "target")?)?,
            key: wire::get_text(value, "key")?.to_owned(),
            value: wire::get(value, "value")?.clone(),
            dot: dot_from_value(wire::get(value, "dot")?)?,
        }),
        other => Err(PatchError::Malformed(format!("unknown op {other:?}"))),
    }
}

impl Patch {
    /// Maps the patch to its canonical [`Value`] form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let context = Value::Map(
            self.context
                .iter()
                .map(|(w, seq)| {
                    (
                        Value::Text(w.as_str().to_owned()),
                        Value::Integer(seq.into()),
                    )
                })
                .collect(),
        );
        let mut fields = vec![
            ("schema", Value::Integer(self.schema.into())),
            ("writer", Value::Text(self.writer.as_str().to_owned())),
            ("lamport", Value::Integer(self.lamport.into())),
            ("context", context),
            ("ops", Value::Array(self.ops.iter().map(op_to_value).collect())),
        ];
        // Schema-2 blobs stay minimal: an empty read set is omitted.
        if !self.reads.is_empty() {
            fields.push((
                "reads",
                Value::Array(
                    self.reads
                        .iter()
                        .map(|r| Value::Text(r.clone()))
                        .collect(),
                ),
            ));
        }
        map(fields)
    }

    /// Reads a patch back from its canonical [`Value`] form.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError`] for shape violations, bad identifiers, or
    /// unknown op kinds.
    pub fn from_value(value: &Value) -> Result<Self, PatchError> {
        let schema32 = u32::try_from(wire::get_u64(value, "schema")?)
            .map_err(|_| PatchError::Malformed("schema out of range".into()))?;
        if schema32 != SCHEMA_V2 && schema32 != SCHEMA_V3 {
            return Err(PatchError::Malformed(format!(
                "unknown schema {schema32}"
            )));
        }
        let writer = WriterId::parse(wire::get_text(value, "writer")?)?;
        let lamport = wire::get_u64(value, "lamport")?;
        if lamport == 0 {
            return Err(PatchError::Malformed("lamport must be positive".into()));
        }
        let mut context = VersionVector::new();
        for (k, v) in wire::get_map_entries(value, "context")? {
            let w = wire::as_text(k, "context key")?;
            if !is_writer_id(w) {
                return Err(PatchError::Malformed(format!(
                    "context key is not a writer id: {w:?}"
                )));
            }
            context.observe(&WriterId::parse(w)?, wire::as_u64(v, "context seq")?);
        }
        let ops = wire::get_array(value, "ops")?
            .iter()
            .map(op_from_value)
            .collect::<Result<Vec<_>, _>>()?;
        let reads = match crate::canonical::map_get(value, "reads") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| wire::as_text(v, "read entry").map(str::to_owned))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(PatchError::Malformed("reads must be an array".into())),
        };
        Ok(Self {
            schema: schema32,
            writer,
            lamport,
            context,
            ops,
            reads,
        })
    }

    /// Encodes to canonical CBOR bytes (the patch blob format).
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Codec`] if a property value is not encodable.
    pub fn encode(&self) -> Result<Vec<u8>, PatchError> {
        Ok(canonical::encode_value(&self.to_value())?)
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
