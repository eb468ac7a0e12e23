// SPDX-License-Identifier: Apache-2.0
//! Validated identifier types for graphs and writers.
//!
//! Both identifiers end up as ref path segments and commit-message trailer
//! values, so validation happens once, at construction, and everything
//! downstream can treat the inner strings as path- and wire-safe.

use thiserror::Error;

/// Lamport timestamp: a positive integer, monotone per writer.
pub type Lamport = u64;

/// Errors raised when validating graph or writer identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentError {
    /// The graph name is empty or contains a forbidden character.
    #[error("invalid graph name: {0:?}")]
    InvalidGraphName(String),
    /// The writer id is empty, too long, or contains a forbidden character.
    #[error("invalid writer id: {0:?} (want [A-Za-z0-9._-]{{1,64}})")]
    InvalidWriterId(String),
    /// A lamport timestamp must be positive.
    #[error("lamport timestamp must be positive, got {0}")]
    NonPositiveLamport(u64),
}

/// A validated graph name.
///
/// Graph names are path segments under `refs/warp/`; they must be non-empty
/// and free of traversal sequences (`..`), separators (`/`, `\`), `;`,
/// spaces, and control bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct GraphName(String);

impl GraphName {
    /// Parses and validates a graph name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError::InvalidGraphName`] when the name is empty or
    /// contains a forbidden character.
    pub fn parse(s: &str) -> Result<Self, IdentError> {
        if is_graph_name(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(IdentError::InvalidGraphName(s.to_owned()))
        }
    }

    /// Returns the validated name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GraphName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated writer identity: `[A-Za-z0-9._-]{1,64}`.
///
/// Each writer owns a linear chain of patch commits; the id doubles as the
/// final segment of the writer's tip ref.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct WriterId(String);

impl WriterId {
    /// Parses and validates a writer id.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError::InvalidWriterId`] unless the input matches
    /// `[A-Za-z0-9._-]{1,64}`.
    pub fn parse(s: &str) -> Result<Self, IdentError> {
        if is_writer_id(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(IdentError::InvalidWriterId(s.to_owned()))
        }
    }

    /// Returns the validated id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WriterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns `true` if `s` is a valid graph name.
#[must_use]
pub fn is_graph_name(s: &str) -> bool {
    !s.is_empty()
        && !s.contains("..")
        && s.chars()
            .all(|c| c != ';' && c != ' ' && c != '/' && c != '\\' && !c.is_control())
}

/// Returns `true` if `s` matches `[A-Za-z0-9._-]{1,64}`.
#[must_use]
pub fn is_writer_id(s: &str) -> bool {
    (1..=64).contains(&s.len())
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

/// Validates a lamport timestamp at an operation boundary.
///
/// # Errors
///
/// Returns [`IdentError::NonPositiveLamport`] for zero.
pub fn check_lamport(lamport: u64) -> Result<Lamport, IdentError> {
    if lamport == 0 {
        Err(IdentError::NonPositiveLamport(lamport))
    } else {
        Ok(lamport)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn graph_name_accepts_reasonable_names() {
        for ok in ["main", "my-graph", "g.1", "Graph_2", "ørsted"] {
            assert!(GraphName::parse(ok).is_ok(), "rejected {ok:?}");
        }
    }

    #[test]
    fn graph_name_rejects_forbidden() {
        for bad in ["", "a..b", "a;b", "a b", "a/b", "a\\b", "a\0b", "a\nb"] {
            assert!(GraphName::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn writer_id_charset_and_length() {
        assert!(WriterId::parse("alice").is_ok());
        assert!(WriterId::parse("node-7.sub_x").is_ok());
        assert!(WriterId::parse(&"w".repeat(64)).is_ok());
        assert!(WriterId::parse("").is_err());
        assert!(WriterId::parse(&"w".repeat(65)).is_err());
        assert!(WriterId::parse("has space").is_err());
        assert!(WriterId::parse("sl/ash").is_err());
        assert!(WriterId::parse("Ünicode").is_err());
    }

    #[test]
    fn lamport_must_be_positive() {
        assert!(check_lamport(0).is_err());
        assert_eq!(check_lamport(1).unwrap(), 1);
    }
}
