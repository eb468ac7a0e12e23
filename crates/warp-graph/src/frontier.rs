// SPDX-License-Identifier: Apache-2.0
//! Frontier: the per-writer tip map.
//!
//! A frontier identifies a point in the causal DAG as `writer → tip commit
//! sha`, produced by scanning the graph's writer refs. Frontiers are
//! serialized into checkpoint blobs and compared for staleness checks.

use std::collections::BTreeMap;

use ciborium::value::Value;
use warp_store::Oid;

use crate::canonical::{self, CodecError};
use crate::ident::WriterId;
use crate::wire;

/// `writer → tip commit sha`, ordered by writer.
pub type Frontier = BTreeMap<WriterId, Oid>;

/// `true` iff the two frontiers differ in size or any tip.
#[must_use]
pub fn frontier_changed(last: &Frontier, current: &Frontier) -> bool {
    last != current
}

/// Maps a frontier to its canonical wire value.
#[must_use]
pub fn frontier_to_value(frontier: &Frontier) -> Value {
    Value::Map(
        frontier
            .iter()
            .map(|(writer, sha)| {
                (
                    Value::Text(writer.as_str().to_owned()),
                    Value::Text(sha.as_str().to_owned()),
                )
            })
            .collect(),
    )
}

/// Reads a frontier back from its wire value.
///
/// # Errors
///
/// Returns [`CodecError`] for shape violations or invalid ids.
pub fn frontier_from_value(value: &Value) -> Result<Frontier, CodecError> {
    let Value::Map(entries) = value else {
        return Err(wire::bad("frontier must be a map"));
    };
    let mut frontier = Frontier::new();
    for (k, v) in entries {
        let writer = WriterId::parse(wire::as_text(k, "frontier writer")?)
            .map_err(|e| wire::bad(&e.to_string()))?;
        let sha = Oid::parse(wire::as_text(v, "frontier sha")?)
            .map_err(|e| wire::bad(&e.to_string()))?;
        frontier.insert(writer, sha);
    }
    Ok(frontier)
}

/// Encodes a frontier to canonical CBOR bytes (the checkpoint frontier blob).
///
/// # Errors
///
/// Propagates [`CodecError`] from the canonical encoder.
pub fn encode_frontier(frontier: &Frontier) -> Result<Vec<u8>, CodecError> {
    canonical::encode_value(&frontier_to_value(frontier))
}

/// Decodes a frontier blob.
///
/// # Errors
///
/// Returns [`CodecError`] for codec or shape violations.
pub fn decode_frontier(bytes: &[u8]) -> Result<Frontier, CodecError> {
    frontier_from_value(&canonical::decode_value(bytes)?)
}
