// SPDX-License-Identifier: Apache-2.0
//! Ports consumed by the WARP graph engine.
//!
//! `warp-store` defines the seams between the engine core and its external
//! collaborators: a Git-like object store ([`PersistencePort`]), cryptographic
//! primitives ([`CryptoPort`]), and a wall clock ([`ClockPort`]). The engine
//! never touches an object store, a hash function, or the system clock
//! directly — everything flows through these traits.
//!
//! Reference implementations ship alongside the traits: [`MemoryStore`] (an
//! in-memory commit/blob/ref store, sufficient for tests and single-process
//! use), [`StdCrypto`] (SHA-256 / HMAC-SHA-256), and [`SystemClock`].
//!
//! # Absence Semantics
//!
//! [`read_ref`](PersistencePort::read_ref) returns `None` for missing refs —
//! absence is not an error. Missing *objects* (blobs, commits, trees) are an
//! error: an [`Oid`] is a promise that the content exists, and a dangling one
//! indicates corruption or a partial transfer.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod clock;
mod crypto;
mod memory;

pub use clock::{ClockPort, FixedClock, SystemClock};
pub use crypto::{CryptoPort, StdCrypto};
pub use memory::MemoryStore;

use std::collections::BTreeMap;

/// A validated object identifier: 40- or 64-character lowercase hex.
///
/// Covers both SHA-1-sized and SHA-256-sized object stores. The inner string
/// is guaranteed well-formed by construction; [`Oid::parse`] is the only way
/// to build one from untrusted input.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Oid(String);

impl Oid {
    /// Parses and validates an object id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidOid`] unless the input is exactly 40 or
    /// 64 lowercase hex characters.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        if is_oid_str(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(StoreError::InvalidOid(s.to_owned()))
        }
    }

    /// Returns the hex string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns `true` if `s` is a well-formed object id (40 or 64 lowercase hex).
#[must_use]
pub fn is_oid_str(s: &str) -> bool {
    (s.len() == 40 || s.len() == 64)
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Commit metadata returned by [`PersistencePort::get_node_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// The commit's own id.
    pub sha: Oid,
    /// Full commit message (title block plus trailers).
    pub message: String,
    /// Parent commit ids, in recorded order.
    pub parents: Vec<Oid>,
}

/// A named ref and its current target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRecord {
    /// Fully qualified ref name (e.g. `refs/warp/g/writers/alice`).
    pub name: String,
    /// Commit id the ref points at.
    pub target: Oid,
}

/// Errors surfaced by [`PersistencePort`] implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The string is not a well-formed object id.
    #[error("invalid object id: {0:?}")]
    InvalidOid(String),
    /// An object id resolved to nothing (corruption or partial transfer).
    #[error("object missing from store: {0}")]
    ObjectMissing(Oid),
    /// The id resolved to an object of a different kind than requested.
    #[error("object {oid} is not a {expected}")]
    WrongKind {
        /// The offending id.
        oid: Oid,
        /// The kind the caller asked for (`commit`, `blob`, `tree`).
        expected: &'static str,
    },
    /// A ref name was rejected by the backend.
    #[error("invalid ref name: {0:?}")]
    InvalidRef(String),
    /// The backend failed in a way the engine cannot interpret.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Git-like object store consumed by the engine.
///
/// Implementations must serialize their own ref updates: concurrent writers
/// in different processes synchronize through the backend's atomic ref-update
/// primitive, not through this trait. All methods are `async` because real
/// backends sit behind I/O; the in-memory implementation completes
/// immediately.
#[async_trait::async_trait]
pub trait PersistencePort: Send + Sync {
    /// Creates a commit object and returns its id.
    ///
    /// `sign` requests backend-level signing where supported; the in-memory
    /// store ignores it.
    async fn commit_node(
        &self,
        message: &str,
        parents: &[Oid],
        sign: bool,
    ) -> Result<Oid, StoreError>;

    /// Reads a ref. `None` means the ref does not exist — not an error.
    async fn read_ref(&self, name: &str) -> Result<Option<Oid>, StoreError>;

    /// Points `name` at `target`, creating the ref if needed.
    async fn update_ref(&self, name: &str, target: &Oid) -> Result<(), StoreError>;

    /// Deletes a ref. Deleting a missing ref is a no-op.
    async fn delete_ref(&self, name: &str) -> Result<(), StoreError>;

    /// Reads a blob's bytes.
    async fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>, StoreError>;

    /// Writes a blob and returns its content id.
    async fn write_blob(&self, bytes: &[u8]) -> Result<Oid, StoreError>;

    /// Reads a tree object as a name → id mapping.
    async fn read_tree(&self, oid: &Oid) -> Result<BTreeMap<String, Oid>, StoreError>;

    /// Writes a tree object and returns its id.
    async fn write_tree(&self, entries: &BTreeMap<String, Oid>) -> Result<Oid, StoreError>;

    /// Returns commit metadata (message and parents) for `sha`.
    async fn get_node_info(&self, sha: &Oid) -> Result<NodeInfo, StoreError>;

    /// Lists all refs whose name starts with `prefix`, sorted by name.
    async fn list_refs(&self, prefix: &str) -> Result<Vec<RefRecord>, StoreError>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Counts commits reachable from `name` (the ref's full ancestry).
    ///
    /// Returns 0 when the ref does not exist.
    async fn count_nodes(&self, name: &str) -> Result<u64, StoreError>;

    /// Reads a backend configuration value.
    async fn config_get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a backend configuration value.
    async fn config_set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
