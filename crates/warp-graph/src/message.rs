// SPDX-License-Identifier: Apache-2.0
//! Commit message codec: patch / checkpoint / anchor / audit trailers.
//!
//! Every WARP commit message is a titled block (`warp:<kind>`) followed by a
//! blank line and `key: value` trailer lines with namespaced keys
//! (`eg-kind`, `eg-graph`, …). Values are validated on parse: 40/64-char
//! lowercase hex for oids, 64-char hex for state hashes, positive integers
//! for lamport and schema, ref-safe strings for graph and writer ids.
//!
//! [`detect_message_kind`] is the safe probe: it returns `None` for any
//! message that is not a well-formed WARP message instead of erroring, so
//! history walks can skip foreign commits.

use std::collections::BTreeMap;

use thiserror::Error;
use warp_store::{is_oid_str, Oid};

use crate::ident::{GraphName, WriterId};

/// Trailer key namespace prefix.
const TRAILER_KIND: &str = "eg-kind";
const TRAILER_GRAPH: &str = "eg-graph";
const TRAILER_WRITER: &str = "eg-writer";
const TRAILER_LAMPORT: &str = "eg-lamport";
const TRAILER_PATCH_OID: &str = "eg-patch-oid";
const TRAILER_STATE_HASH: &str = "eg-state-hash";
const TRAILER_FRONTIER_OID: &str = "eg-frontier-oid";
const TRAILER_INDEX_OID: &str = "eg-index-oid";
const TRAILER_SCHEMA: &str = "eg-schema";
const TRAILER_CHECKPOINT: &str = "eg-checkpoint";
const TRAILER_DATA_COMMIT: &str = "eg-data-commit";
const TRAILER_OPS_DIGEST: &str = "eg-ops-digest";

/// Checkpoint protocol version carried in `eg-checkpoint`.
pub const CHECKPOINT_VERSION: &str = "v5";

/// Errors raised while parsing or building commit messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// The title line is not `warp:<kind>`.
    #[error("not a warp commit message")]
    BadTitle,
    /// The `eg-kind` trailer names an unknown kind.
    #[error("unknown message kind: {0:?}")]
    UnknownKind(String),
    /// A required trailer is absent.
    #[error("missing trailer: {0}")]
    MissingTrailer(&'static str),
    /// A trailer value failed validation.
    #[error("invalid trailer {key}: {value:?}")]
    BadTrailer {
        /// Trailer key.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// The four WARP commit kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A writer's patch commit.
    Patch,
    /// A materialized-state checkpoint.
    Checkpoint,
    /// A coverage anchor (merge-only marker).
    Anchor,
    /// An audit-trail record.
    Audit,
}

impl MessageKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Patch => "patch",
            Self::Checkpoint => "checkpoint",
            Self::Anchor => "anchor",
            Self::Audit => "audit",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "patch" => Some(Self::Patch),
            "checkpoint" => Some(Self::Checkpoint),
            "anchor" => Some(Self::Anchor),
            "audit" => Some(Self::Audit),
            _ => None,
        }
    }
}

/// Trailers of a patch commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchMessage {
    /// Graph the patch belongs to.
    pub graph: GraphName,
    /// Writer that produced it.
    pub writer: WriterId,
    /// Writer-monotone lamport timestamp.
    pub lamport: u64,
    /// Blob oid of the canonical patch encoding.
    pub patch_oid: Oid,
    /// Declared schema version.
    pub schema: u32,
}

/// Trailers of a checkpoint commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointMessage {
    /// Graph the checkpoint belongs to.
    pub graph: GraphName,
    /// Hash of the canonical visible projection at the frontier.
    pub state_hash: String,
    /// Blob oid of the serialized frontier.
    pub frontier_oid: Oid,
    /// Blob oid of the serialized provenance index.
    pub index_oid: Oid,
    /// Schema version of the serialized state.
    pub schema: u32,
}

/// Trailers of an anchor commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorMessage {
    /// Graph the anchor covers.
    pub graph: GraphName,
    /// Schema version at anchor time.
    pub schema: u32,
}

/// Trailers of an audit commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditMessage {
    /// Graph the audit record belongs to.
    pub graph: GraphName,
    /// Writer the audited commit belongs to.
    pub writer: WriterId,
    /// The data commit being audited.
    pub data_commit: Oid,
    /// `sha256` digest of the canonical-JSON ops (see [`ops_digest`]).
    pub ops_digest: String,
    /// Schema version of the audited patch.
    pub schema: u32,
}

/// A parsed WARP commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitMessage {
    /// `warp:patch`.
    Patch(PatchMessage),
    /// `warp:checkpoint`.
    Checkpoint(CheckpointMessage),
    /// `warp:anchor`.
    Anchor(AnchorMessage),
    /// `warp:audit`.
    Audit(AuditMessage),
}

impl CommitMessage {
    /// The message's kind.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Patch(_) => MessageKind::Patch,
            Self::Checkpoint(_) => MessageKind::Checkpoint,
            Self::Anchor(_) => MessageKind::Anchor,
            Self::Audit(_) => MessageKind::Audit,
        }
    }

    /// Renders the full commit message: title, blank line, trailers.
    ///
    /// Patch, checkpoint, and anchor trailers render in their documented
    /// order; audit trailers render in lexicographic key order.
    #[must_use]
    pub fn render(&self) -> String {
        let kind = self.kind();
        let mut out = format!("warp:{}\n\n", kind.as_str());
        let mut push = |key: &str, value: &str| {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        };
        match self {
            Self::Patch(m) => {
                push(TRAILER_KIND, kind.as_str());
                push(TRAILER_GRAPH, m.graph.as_str());
                push(TRAILER_WRITER, m.writer.as_str());
                push(TRAILER_LAMPORT, &m.lamport.to_string());
                push(TRAILER_PATCH_OID, m.patch_oid.as_str());
                push(TRAILER_SCHEMA, &m.schema.to_string());
            }
            Self::Checkpoint(m) => {
                push(TRAILER_KIND, kind.as_str());
                push(TRAILER_GRAPH, m.graph.as_str());
                push(TRAILER_STATE_HASH, &m.state_hash);
                push(TRAILER_FRONTIER_OID, m.frontier_oid.as_str());
                push(TRAILER_INDEX_OID, m.index_oid.as_str());
                push(TRAILER_SCHEMA, &m.schema.to_string());
                push(TRAILER_CHECKPOINT, CHECKPOINT_VERSION);
            }
            Self::Anchor(m) => {
                push(TRAILER_KIND, kind.as_str());
                push(TRAILER_GRAPH, m.graph.as_str());
                push(TRAILER_SCHEMA, &m.schema.to_string());
            }
            Self::Audit(m) => {
                // Lexicographic trailer order for audit records.
                push(TRAILER_DATA_COMMIT, m.data_commit.as_str());
                push(TRAILER_GRAPH, m.graph.as_str());
                push(TRAILER_KIND, kind.as_str());
                push(TRAILER_OPS_DIGEST, &m.ops_digest);
                push(TRAILER_SCHEMA, &m.schema.to_string());
                push(TRAILER_WRITER, m.writer.as_str());
            }
        }
        out
    }

    /// Parses and validates a WARP commit message.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] for a foreign title, an unknown kind, or any
    /// missing/invalid trailer.
    pub fn parse(message: &str) -> Result<Self, MessageError> {
        let trailers = split_trailers(message).ok_or(MessageError::BadTitle)?;
        let kind_value = trailers
            .get(TRAILER_KIND)
            .ok_or(MessageError::MissingTrailer(TRAILER_KIND))?;
        let kind = MessageKind::parse(kind_value)
            .ok_or_else(|| MessageError::UnknownKind((*kind_value).to_string()))?;

        let graph = parse_graph(&trailers)?;
        let schema = parse_positive(&trailers, TRAILER_SCHEMA)?;
        let schema = u32::try_from(schema).map_err(|_| MessageError::BadTrailer {
            key: TRAILER_SCHEMA,
            value: schema.to_string(),
        })?;

        match kind {
            MessageKind::Patch => Ok(Self::Patch(PatchMessage {
                graph,
                writer: parse_writer(&trailers)?,
                lamport: parse_positive(&trailers, TRAILER_LAMPORT)?,
                patch_oid: parse_oid(&trailers, TRAILER_PATCH_OID)?,
                schema,
            })),
            MessageKind::Checkpoint => {
                let checkpoint = trailers
                    .get(TRAILER_CHECKPOINT)
                    .ok_or(MessageError::MissingTrailer(TRAILER_CHECKPOINT))?;
                if *checkpoint != CHECKPOINT_VERSION {
                    return Err(MessageError::BadTrailer {
                        key: TRAILER_CHECKPOINT,
                        value: (*checkpoint).to_string(),
                    });
                }
                Ok(Self::Checkpoint(CheckpointMessage {
                    graph,
                    state_hash: parse_state_hash(&trailers)?,
                    frontier_oid: parse_oid(&trailers, TRAILER_FRONTIER_OID)?,
                    index_oid: parse_oid(&trailers, TRAILER_INDEX_OID)?,
                    schema,
                }))
            }
            MessageKind::Anchor => Ok(Self::Anchor(AnchorMessage { graph, schema })),
            MessageKind::Audit => {
                let digest = trailers
                    .get(TRAILER_OPS_DIGEST)
                    .ok_or(MessageError::MissingTrailer(TRAILER_OPS_DIGEST))?;
                if !is_hex64(digest) {
                    return Err(MessageError::BadTrailer {
                        key: TRAILER_OPS_DIGEST,
                        value: (*digest).to_string(),
                    });
                }
                Ok(Self::Audit(AuditMessage {
                    graph,
                    writer: parse_writer(&trailers)?,
                    data_commit: parse_oid(&trailers, TRAILER_DATA_COMMIT)?,
                    ops_digest: (*digest).to_string(),
                    schema,
                }))
            }
        }
    }
}

/// Probes a commit message for its WARP kind.
///
/// Returns `None` for anything that does not parse as a well-formed WARP
/// message — foreign commits are expected, not errors.
#[must_use]
pub fn detect_message_kind(message: &str) -> Option<MessageKind> {
    CommitMessage::parse(message).ok().map(|m| m.kind())
}

/// An audit receipt: the tamper-evident record backing an audit commit.
///
/// The canonical form is CBOR with lexicographically sorted keys
/// (`dataCommit`, `graphName`, `opsDigest`, `prevAuditCommit`, `tickEnd`,
/// `tickStart`, `timestamp`, `version`, `writerId`); `prevAuditCommit`
/// encodes as null for the first receipt of a writer's trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReceipt {
    /// The data commit being audited.
    pub data_commit: Oid,
    /// Graph the receipt belongs to.
    pub graph_name: GraphName,
    /// Ops digest of the audited patch.
    pub ops_digest: String,
    /// Previous audit commit in the writer's trail, if any.
    pub prev_audit_commit: Option<Oid>,
    /// Last lamport covered by this receipt.
    pub tick_end: u64,
    /// First lamport covered by this receipt.
    pub tick_start: u64,
    /// Creation timestamp (ISO 8601).
    pub timestamp: String,
    /// Receipt format version.
    pub version: u64,
    /// Writer the audited commit belongs to.
    pub writer_id: WriterId,
}

impl AuditReceipt {
    /// Maps the receipt to its canonical value form.
    #[must_use]
    pub fn to_value(&self) -> ciborium::value::Value {
        use ciborium::value::Value;
        crate::canonical::map(vec![
            ("dataCommit", Value::Text(self.data_commit.as_str().to_owned())),
            ("graphName", Value::Text(self.graph_name.as_str().to_owned())),
            ("opsDigest", Value::Text(self.ops_digest.clone())),
            (
                "prevAuditCommit",
                self.prev_audit_commit.as_ref().map_or(Value::Null, |oid| {
                    Value::Text(oid.as_str().to_owned())
                }),
            ),
            ("tickEnd", Value::Integer(self.tick_end.into())),
            ("tickStart", Value::Integer(self.tick_start.into())),
            ("timestamp", Value::Text(self.timestamp.clone())),
            ("version", Value::Integer(self.version.into())),
            ("writerId", Value::Text(self.writer_id.as_str().to_owned())),
        ])
    }

    /// Encodes to canonical CBOR bytes (lex-sorted keys).
    ///
    /// # Errors
    ///
    /// Propagates [`crate::canonical::CodecError`] from the encoder.
    pub fn encode(&self) -> Result<Vec<u8>, crate::canonical::CodecError> {
        crate::canonical::encode_value(&self.to_value())
    }

    /// Decodes a receipt from canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::canonical::CodecError`] for codec or shape
    /// violations.
    pub fn decode(bytes: &[u8]) -> Result<Self, crate::canonical::CodecError> {
        use crate::wire;
        let value = crate::canonical::decode_value(bytes)?;
        let prev_audit_commit = match wire::get(&value, "prevAuditCommit")? {
            ciborium::value::Value::Null => None,
            ciborium::value::Value::Text(s) => {
                Some(Oid::parse(s).map_err(|e| wire::bad(&e.to_string()))?)
            }
            _ => return Err(wire::bad("prevAuditCommit must be text or null")),
        };
        Ok(Self {
            data_commit: Oid::parse(wire::get_text(&value, "dataCommit")?)
                .map_err(|e| wire::bad(&e.to_string()))?,
            graph_name: GraphName::parse(wire::get_text(&value, "graphName")?)
                .map_err(|e| wire::bad(&e.to_string()))?,
            ops_digest: wire::get_text(&value, "opsDigest")?.to_owned(),
            prev_audit_commit,
            tick_end: wire::get_u64(&value, "tickEnd")?,
            tick_start: wire::get_u64(&value, "tickStart")?,
            timestamp: wire::get_text(&value, "timestamp")?.to_owned(),
            version: wire::get_u64(&value, "version")?,
            writer_id: WriterId::parse(wire::get_text(&value, "writerId")?)
                .map_err(|e| wire::bad(&e.to_string()))?,
        })
    }
}

// Title must be `warp:<something>` followed by a blank line; trailers are
// `key: value` lines. Returns None for a foreign message shape.
fn split_trailers(message: &str) -> Option<BTreeMap<&str, &str>> {
    let mut lines = message.lines();
    let title = lines.next()?;
    if !title.starts_with("warp:") {
        return None;
    }
    let mut trailers = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(": ")?;
        trailers.insert(key, value);
    }
    Some(trailers)
}

fn parse_graph(trailers: &BTreeMap<&str, &str>) -> Result<GraphName, MessageError> {
    let value = trailers
        .get(TRAILER_GRAPH)
        .ok_or(MessageError::MissingTrailer(TRAILER_GRAPH))?;
    GraphName::parse(value).map_err(|_| MessageError::BadTrailer {
        key: TRAILER_GRAPH,
        value: (*value).to_string(),
    })
}

fn parse_writer(trailers: &BTreeMap<&str, &str>) -> Result<WriterId, MessageError> {
    let value = trailers
        .get(TRAILER_WRITER)
        .ok_or(MessageError::MissingTrailer(TRAILER_WRITER))?;
    WriterId::parse(value).map_err(|_| MessageError::BadTrailer {
        key: TRAILER_WRITER,
        value: (*value).to_string(),
    })
}

fn parse_positive(
    trailers: &BTreeMap<&str, &str>,
    key: &'static str,
) -> Result<u64, MessageError> {
    let value = trailers
        .get(key)
        .ok_or(MessageError::MissingTrailer(key))?;
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(MessageError::BadTrailer {
            key,
            value: (*value).to_string(),
        }),
    }
}

fn parse_oid(trailers: &BTreeMap<&str, &str>, key: &'static str) -> Result<Oid, MessageError> {
    let value = trailers
        .get(key)
        .ok_or(MessageError::MissingTrailer(key))?;
    Oid::parse(value).map_err(|_| MessageError::BadTrailer {
        key,
        value: (*value).to_string(),
    })
}

fn parse_state_hash(trailers: &BTreeMap<&str, &str>) -> Result<String, MessageError> {
    let value = trailers
        .get(TRAILER_STATE_HASH)
        .ok_or(MessageError::MissingTrailer(TRAILER_STATE_HASH))?;
    if is_hex64(value) {
        Ok((*value).to_string())
    } else {
        Err(MessageError::BadTrailer {
            key: TRAILER_STATE_HASH,
            value: (*value).to_string(),
        })
    }
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && is_oid_str(s)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn g() -> GraphName {
        GraphName::parse("main").unwrap()
    }

    fn w() -> WriterId {
        WriterId::parse("alice").unwrap()
    }

    fn oid(byte: u8) -> Oid {
        Oid::parse(&hex::encode([byte; 32])).unwrap()
    }

    #[test]
    fn patch_message_round_trip() {
        let msg = CommitMessage::Patch(PatchMessage {
            graph: g(),
            writer: w(),
            lamport: 12,
            patch_oid: oid(1),
            schema: 2,
        });
        let rendered = msg.render();
        assert!(rendered.starts_with("warp:patch\n\neg-kind: patch\n"));
        assert_eq!(CommitMessage::parse(&rendered).unwrap(), msg);
        assert_eq!(detect_message_kind(&rendered), Some(MessageKind::Patch));
    }

    #[test]
    fn checkpoint_message_round_trip() {
        let msg = CommitMessage::Checkpoint(CheckpointMessage {
            graph: g(),
            state_hash: hex::encode([9u8; 32]),
            frontier_oid: oid(2),
            index_oid: oid(3),
            schema: 3,
        });
        let rendered = msg.render();
        assert!(rendered.contains("eg-checkpoint: v5\n"));
        assert_eq!(CommitMessage::parse(&rendered).unwrap(), msg);
    }

    #[test]
    fn anchor_and_audit_round_trip() {
        let anchor = CommitMessage::Anchor(AnchorMessage {
            graph: g(),
            schema: 2,
        });
        assert_eq!(CommitMessage::parse(&anchor.render()).unwrap(), anchor);

        let audit = CommitMessage::Audit(AuditMessage {
            graph: g(),
            writer: w(),
            data_commit: oid(4),
            ops_digest: hex::encode([5u8; 32]),
            schema: 2,
        });
        let rendered = audit.render();
        // Audit trailers are in lexicographic key order.
        let body = rendered.split("\n\n").nth(1).unwrap();
        let keys: Vec<&str> = body
            .lines()
            .map(|l| l.split_once(": ").unwrap().0)
            .collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        assert_eq!(CommitMessage::parse(&rendered).unwrap(), audit);
    }

    #[test]
    fn audit_receipt_canonical_form() {
        let receipt = AuditReceipt {
            data_commit: oid(1),
            graph_name: g(),
            ops_digest: hex::encode([2u8; 32]),
            prev_audit_commit: None,
            tick_end: 7,
            tick_start: 7,
            timestamp: "2023-11-14T22:13:20Z".into(),
            version: 1,
            writer_id: w(),
        };
        let bytes = receipt.encode().unwrap();
        assert_eq!(AuditReceipt::decode(&bytes).unwrap(), receipt);

        // Keys land in lexicographic order on the wire: dataCommit first,
        // writerId last.
        let first_key_pos = bytes
            .windows(10)
            .position(|win| win == b"dataCommit")
            .unwrap();
        let last_key_pos = bytes.windows(8).position(|win| win == b"writerId").unwrap();
        assert!(first_key_pos < last_key_pos);

        // A chained receipt round-trips its predecessor.
        let chained = AuditReceipt {
            prev_audit_commit: Some(oid(3)),
            ..receipt
        };
        let bytes = chained.encode().unwrap();
        assert_eq!(AuditReceipt::decode(&bytes).unwrap(), chained);
    }

    #[test]
    fn detect_is_safe_on_foreign_messages() {
        assert_eq!(detect_message_kind("fix: typo in readme"), None);
        assert_eq!(detect_message_kind(""), None);
        assert_eq!(detect_message_kind("warp:patch\n\nnot a trailer line"), None);
        assert_eq!(
            detect_message_kind("warp:patch\n\neg-kind: mystery\neg-graph: g\neg-schema: 2"),
            None
        );
    }

    #[test]
    fn validation_failures() {
        // Zero lamport.
        let zero = "warp:patch\n\neg-kind: patch\neg-graph: main\neg-writer: alice\n\
                    eg-lamport: 0\neg-patch-oid: "
            .to_owned()
            + &"a".repeat(40)
            + "\neg-schema: 2\n";
        assert!(matches!(
            CommitMessage::parse(&zero),
            Err(MessageError::BadTrailer {
                key: "eg-lamport",
                ..
            })
        ));
        // Bad oid.
        let bad_oid = "warp:patch\n\neg-kind: patch\neg-graph: main\neg-writer: alice\n\
                       eg-lamport: 1\neg-patch-oid: nothex\neg-schema: 2\n";
        assert!(matches!(
            CommitMessage::parse(bad_oid),
            Err(MessageError::BadTrailer {
                key: "eg-patch-oid",
                ..
            })
        ));
        // Missing writer.
        let missing = "warp:patch\n\neg-kind: patch\neg-graph: main\n\
                       eg-lamport: 1\neg-patch-oid: "
            .to_owned()
            + &"a".repeat(40)
            + "\neg-schema: 2\n";
        assert!(matches!(
            CommitMessage::parse(&missing),
            Err(MessageError::MissingTrailer("eg-writer"))
        ));
        // 40-char state hash is not acceptable (64 required).
        let short_hash = "warp:checkpoint\n\neg-kind: checkpoint\neg-graph: main\n\
                          eg-state-hash: "
            .to_owned()
            + &"a".repeat(40)
            + "\neg-frontier-oid: "
            + &"b".repeat(40)
            + "\neg-index-oid: "
            + &"c".repeat(40)
            + "\neg-schema: 2\neg-checkpoint: v5\n";
        assert!(matches!(
            CommitMessage::parse(&short_hash),
            Err(MessageError::BadTrailer {
                key: "eg-state-hash",
                ..
            })
        ));
    }
}
