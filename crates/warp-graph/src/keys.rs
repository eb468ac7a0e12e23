// SPDX-License-Identifier: Apache-2.0
//! Composite key codec for edges and properties.
//!
//! Edges are identified by the triple `(from, to, label)` encoded as
//! `from \0 to \0 label`. Property keys live in two namespaces: node
//! properties use the bare node id, edge properties prefix the encoded edge
//! key with a `0x01` sentinel byte. The encoder rejects components that
//! contain either separator byte, so decoding is unambiguous.

use thiserror::Error;

/// Separator between edge-key components.
pub const KEY_SEPARATOR: char = '\0';

/// Leading sentinel for the edge-property namespace.
pub const EDGE_PROP_SENTINEL: char = '\u{1}';

/// Errors raised by the key codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// A component contained a reserved byte (`\0` or `0x01`).
    #[error("key component contains a reserved byte: {0:?}")]
    ReservedByte(String),
    /// An encoded edge key did not split into exactly three components.
    #[error("malformed edge key: {0:?}")]
    MalformedEdgeKey(String),
}

/// A directed labeled edge identity.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EdgeKey {
    /// Source node id.
    pub from: String,
    /// Destination node id.
    pub to: String,
    /// Edge label.
    pub label: String,
}

impl EdgeKey {
    /// Builds and validates an edge key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::ReservedByte`] if any component contains `\0` or
    /// `0x01`.
    pub fn new(from: &str, to: &str, label: &str) -> Result<Self, KeyError> {
        for part in [from, to, label] {
            check_component(part)?;
        }
        Ok(Self {
            from: from.to_owned(),
            to: to.to_owned(),
            label: label.to_owned(),
        })
    }

    /// Encodes to the wire form `from \0 to \0 label`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{}",
            self.from, self.to, self.label
        )
    }

    /// Decodes the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MalformedEdgeKey`] unless the input splits into
    /// exactly three components.
    pub fn decode(encoded: &str) -> Result<Self, KeyError> {
        let parts: Vec<&str> = encoded.split(KEY_SEPARATOR).collect();
        let [from, to, label] = parts.as_slice() else {
            return Err(KeyError::MalformedEdgeKey(encoded.to_owned()));
        };
        Self::new(from, to, label)
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from, self.label, self.to)
    }
}

/// Target of a `PropSet` op: a node or (schema 3) an edge.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum PropTarget {
    /// A node property, addressed by node id.
    Node(String),
    /// An edge property, addressed by the edge triple.
    Edge(EdgeKey),
}

impl PropTarget {
    /// Builds a node target, validating the id.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::ReservedByte`] if the id contains `\0` or `0x01`.
    pub fn node(id: &str) -> Result<Self, KeyError> {
        check_component(id)?;
        Ok(Self::Node(id.to_owned()))
    }

    /// Encodes to the wire form: bare node id, or sentinel-prefixed edge key.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Node(id) => id.clone(),
            Self::Edge(edge) => format!("{EDGE_PROP_SENTINEL}{}", edge.encode()),
        }
    }

    /// Decodes the wire form by inspecting the leading byte.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MalformedEdgeKey`] for a sentinel-prefixed key
    /// that does not decode as an edge triple, or [`KeyError::ReservedByte`]
    /// for a node id with interior reserved bytes.
    pub fn decode(encoded: &str) -> Result<Self, KeyError> {
        if let Some(rest) = encoded.strip_prefix(EDGE_PROP_SENTINEL) {
            Ok(Self::Edge(EdgeKey::decode(rest)?))
        } else {
            Self::node(encoded)
        }
    }

    /// `true` iff this target addresses an edge property (schema 3 only).
    #[must_use]
    pub fn is_edge(&self) -> bool {
        matches!(self, Self::Edge(_))
    }
}

fn check_component(part: &str) -> Result<(), KeyError> {
    if part.contains(KEY_SEPARATOR) || part.contains(EDGE_PROP_SENTINEL) {
        return Err(KeyError::ReservedByte(part.to_owned()));
    }
    Ok(())
}
