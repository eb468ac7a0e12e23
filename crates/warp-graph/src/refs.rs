// SPDX-License-Identifier: Apache-2.0
//! Ref layout: namespaced paths for writers, checkpoints, cursors, coverage,
//! and the seek cache.
//!
//! All refs for a graph live under the single prefix
//! `refs/warp/<graph>/`, so one prefix scan enumerates a graph's writers.
//! Builders take validated identifiers; parsers re-validate every segment and
//! reject traversal sequences, so a hostile ref name read back from a store
//! can never smuggle a bad graph or writer id into the engine.

use thiserror::Error;

use crate::ident::{is_writer_id, GraphName, WriterId};

/// Shared namespace prefix for all WARP refs.
pub const REF_ROOT: &str = "refs/warp";

/// Errors raised while parsing ref paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
    /// The path does not live under `refs/warp/`.
    #[error("not a warp ref: {0:?}")]
    NotWarp(String),
    /// A path segment failed validation.
    #[error("invalid ref path: {0:?}")]
    Invalid(String),
}

/// Builds the writer tip ref: `refs/warp/<graph>/writers/<writer>`.
#[must_use]
pub fn writer_ref(graph: &GraphName, writer: &WriterId) -> String {
    format!("{REF_ROOT}/{graph}/writers/{writer}")
}

/// Builds the writers prefix for enumeration: `refs/warp/<graph>/writers/`.
#[must_use]
pub fn writers_prefix(graph: &GraphName) -> String {
    format!("{REF_ROOT}/{graph}/writers/")
}

/// Builds the checkpoint head ref: `refs/warp/<graph>/checkpoints/head`.
#[must_use]
pub fn checkpoint_head_ref(graph: &GraphName) -> String {
    format!("{REF_ROOT}/{graph}/checkpoints/head")
}

/// Builds the coverage head ref: `refs/warp/<graph>/coverage/head`.
#[must_use]
pub fn coverage_head_ref(graph: &GraphName) -> String {
    format!("{REF_ROOT}/{graph}/coverage/head")
}

/// Builds the active cursor ref: `refs/warp/<graph>/cursor/active`.
#[must_use]
pub fn cursor_active_ref(graph: &GraphName) -> String {
    format!("{REF_ROOT}/{graph}/cursor/active")
}

/// Builds a saved cursor ref: `refs/warp/<graph>/cursor/saved/<name>`.
///
/// # Errors
///
/// Returns [`RefError::Invalid`] unless `name` matches the writer-id charset
/// (the same path-safe alphabet).
pub fn cursor_saved_ref(graph: &GraphName, name: &str) -> Result<String, RefError> {
    if !is_writer_id(name) {
        return Err(RefError::Invalid(name.to_owned()));
    }
    Ok(format!("{REF_ROOT}/{graph}/cursor/saved/{name}"))
}

/// Builds the seek cache ref: `refs/warp/<graph>/seek-cache`.
#[must_use]
pub fn seek_cache_ref(graph: &GraphName) -> String {
    format!("{REF_ROOT}/{graph}/seek-cache")
}

/// Extracts the writer id from a writer tip ref belonging to `graph`.
///
/// # Errors
///
/// Returns [`RefError::NotWarp`] for paths outside the graph's writer
/// namespace and [`RefError::Invalid`] when the final segment is not a valid
/// writer id.
pub fn parse_writer_ref(graph: &GraphName, path: &str) -> Result<WriterId, RefError> {
    let prefix = writers_prefix(graph);
    let rest = path
        .strip_prefix(&prefix)
        .ok_or_else(|| RefError::NotWarp(path.to_owned()))?;
    if rest.is_empty() || rest.contains('/') {
        return Err(RefError::Invalid(path.to_owned()));
    }
    WriterId::parse(rest).map_err(|_| RefError::Invalid(path.to_owned()))
}

/// Extracts the graph name from any warp ref path.
///
/// # Errors
///
/// Returns [`RefError::NotWarp`] for paths outside `refs/warp/` and
/// [`RefError::Invalid`] when the graph segment fails validation.
pub fn parse_graph_segment(path: &str) -> Result<GraphName, RefError> {
    let rest = path
        .strip_prefix(REF_ROOT)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(|| RefError::NotWarp(path.to_owned()))?;
    let (graph, _) = rest
        .split_once('/')
        .ok_or_else(|| RefError::Invalid(path.to_owned()))?;
    GraphName::parse(graph).map_err(|_| RefError::Invalid(path.to_owned()))
}
