// SPDX-License-Identifier: Apache-2.0
//! Guarded reads, status, temporal predicates, and glob views.
//!
//! Read operations require a fresh cache. A missing cache fails with
//! `E_NO_STATE`, a stale one with `E_STALE_STATE`; under `auto_materialize`
//! both transparently trigger a materialize instead. `status()` is the one
//! exception: it never materializes, under any configuration.

use std::collections::BTreeMap;

use ciborium::value::Value;

use crate::frontier::{frontier_changed, Frontier};
use crate::keys::EdgeKey;
use crate::state::WarpState;
use crate::temporal;

use super::{GraphError, MaterializeOptions, WarpGraph};

/// Freshness of the cached state as reported by [`WarpGraph::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFreshness {
    /// The cache matches the current writer tips.
    Fresh,
    /// Writer tips moved since the cache was built.
    Stale,
    /// No state has ever been materialized.
    None,
}

/// Lightweight, O(writers) status snapshot.
#[derive(Debug, Clone)]
pub struct Status {
    /// Freshness of the cached state.
    pub cached_state: StateFreshness,
    /// Patches committed or applied since the last checkpoint.
    pub patches_since_checkpoint: u64,
    /// Tombstone-to-dot ratio of the cached state (0.0 without a cache).
    pub tombstone_ratio: f64,
    /// Number of writers with a tip ref.
    pub writers: usize,
    /// The scanned frontier.
    pub frontier: Frontier,
}

impl WarpGraph {
    // Query guard: refresh or fail depending on `auto_materialize`.
    async fn ensure_fresh(&mut self) -> Result<(), GraphError> {
        let missing = self.cached.is_none();
        if !missing && !self.state_dirty {
            // The flag alone is not enough: another writer may have moved a
            // tip since the last materialize.
            if self.has_frontier_changed().await? {
                self.state_dirty = true;
            }
        }
        if missing {
            if self.options.auto_materialize {
                self.materialize(MaterializeOptions::default()).await?;
                return Ok(());
            }
            return Err(GraphError::NoState);
        }
        if self.state_dirty {
            if self.options.auto_materialize {
                self.materialize(MaterializeOptions::default()).await?;
                return Ok(());
            }
            return Err(GraphError::StaleState);
        }
        Ok(())
    }

    pub(crate) fn cached_state(&self) -> Result<&WarpState, GraphError> {
        self.cached
            .as_ref()
            .map(|c| &c.state)
            .ok_or(GraphError::NoState)
    }

    /// `true` iff the node is visible.
    pub async fn has_node(&mut self, node: &str) -> Result<bool, GraphError> {
        self.ensure_fresh().await?;
        Ok(self.cached_state()?.has_node(node))
    }

    /// All visible node ids, sorted.
    pub async fn get_nodes(&mut self) -> Result<Vec<String>, GraphError> {
        self.ensure_fresh().await?;
        Ok(self.cached_state()?.visible_nodes())
    }

    /// All visible edges, sorted by `(from, to, label)`.
    pub async fn get_edges(&mut self) -> Result<Vec<EdgeKey>, GraphError> {
        self.ensure_fresh().await?;
        Ok(self.cached_state()?.visible_edges())
    }

    /// Visible properties of a node.
    pub async fn get_node_props(
        &mut self,
        node: &str,
    ) -> Result<BTreeMap<String, Value>, GraphError> {
        self.ensure_fresh().await?;
        Ok(self.cached_state()?.node_props(node))
    }

    /// Properties of a visible edge.
    pub async fn get_edge_props(
        &mut self,
        edge: &EdgeKey,
    ) -> Result<BTreeMap<String, Value>, GraphError> {
        self.ensure_fresh().await?;
        Ok(self.cached_state()?.edge_props(edge))
    }

    /// Visible neighbors of a node (targets of its outgoing edges).
    pub async fn neighbors(&mut self, node: &str) -> Result<Vec<String>, GraphError> {
        self.ensure_fresh().await?;
        Ok(self.cached_state()?.neighbors(node))
    }

    /// Lightweight status snapshot. Never materializes, even under
    /// `auto_materialize`.
    pub async fn status(&self) -> Result<Status, GraphError> {
        let frontier = self.scan_frontier().await?;
        let cached_state = match &self.cached {
            None => StateFreshness::None,
            Some(_) if self.state_dirty || frontier_changed(&self.last_frontier, &frontier) => {
                StateFreshness::Stale
            }
            Some(_) => StateFreshness::Fresh,
        };
        Ok(Status {
            cached_state,
            patches_since_checkpoint: self.patches_since_checkpoint,
            tombstone_ratio: self
                .cached
                .as_ref()
                .map_or(0.0, |c| c.state.tombstone_ratio()),
            writers: frontier.len(),
            frontier,
        })
    }

    /// Evaluates `predicate` after every fold step of history (bounded by
    /// `ceiling`): `true` iff it holds at every step, including the empty
    /// state.
    pub async fn always<P>(&self, ceiling: Option<u64>, predicate: P) -> Result<bool, GraphError>
    where
        P: FnMut(&WarpState) -> bool,
    {
        let frontier = self.scan_frontier().await?;
        let mut entries = self.load_patches(&frontier, ceiling, None).await?;
        crate::reduce::sort_causally(&mut entries);
        Ok(temporal::always(&entries, predicate))
    }

    /// Evaluates `predicate` after every fold step of history (bounded by
    /// `ceiling`): `true` iff it holds at some step.
    pub async fn eventually<P>(
        &self,
        ceiling: Option<u64>,
        predicate: P,
    ) -> Result<bool, GraphError>
    where
        P: FnMut(&WarpState) -> bool,
    {
        let frontier = self.scan_frontier().await?;
        let mut entries = self.load_patches(&frontier, ceiling, None).await?;
        crate::reduce::sort_causally(&mut entries);
        Ok(temporal::eventually(&entries, predicate))
    }

    /// Builds a glob-filtered read-only view over the materialized state.
    ///
    /// A node is in the view iff its id matches `glob`; an edge is in the
    /// view iff both endpoints match. Properties pass through the
    /// expose/redact filters of `options`.
    pub async fn view(
        &mut self,
        glob: &str,
        options: ViewOptions,
    ) -> Result<GraphView, GraphError> {
        self.ensure_fresh().await?;
        let state = self.cached_state()?;
        let nodes: Vec<String> = state
            .visible_nodes()
            .into_iter()
            .filter(|n| glob_match(glob, n))
            .collect();
        let edges: Vec<EdgeKey> = state
            .visible_edges()
            .into_iter()
            .filter(|e| glob_match(glob, &e.from) && glob_match(glob, &e.to))
            .collect();
        let mut props = BTreeMap::new();
        for node in &nodes {
            let filtered: BTreeMap<String, Value> = state
                .node_props(node)
                .into_iter()
                .filter(|(key, _)| options.allows(key))
                .collect();
            if !filtered.is_empty() {
                props.insert(node.clone(), filtered);
            }
        }
        Ok(GraphView {
            nodes,
            edges,
            props,
        })
    }
}

/// Property filtering for views.
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    /// When set, only these property keys are returned.
    pub expose: Option<Vec<String>>,
    /// These property keys are never returned (wins over `expose`).
    pub redact: Vec<String>,
}

impl ViewOptions {
    fn allows(&self, key: &str) -> bool {
        if self.redact.iter().any(|k| k == key) {
            return false;
        }
        match &self.expose {
            Some(exposed) => exposed.iter().any(|k| k == key),
            None => true,
        }
    }
}

/// Read-only, glob-filtered projection of a materialized state.
#[derive(Debug, Clone)]
pub struct GraphView {
    nodes: Vec<String>,
    edges: Vec<EdgeKey>,
    props: BTreeMap<String, BTreeMap<String, Value>>,
}

impl GraphView {
    /// `true` iff the node is in the view.
    #[must_use]
    pub fn has_node(&self, node: &str) -> bool {
        self.nodes.binary_search_by(|n| n.as_str().cmp(node)).is_ok()
    }

    /// Nodes in the view, sorted.
    #[must_use]
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Edges in the view (both endpoints matched), sorted.
    #[must_use]
    pub fn edges(&self) -> &[EdgeKey] {
        &self.edges
    }

    /// Filtered properties of a node in the view.
    #[must_use]
    pub fn node_props(&self, node: &str) -> BTreeMap<String, Value> {
        self.props.get(node).cloned().unwrap_or_default()
    }
}

// Minimal glob matcher: `*` matches any run (including empty), `?` matches
// one character. Sufficient for id-prefix views like `user:*`.
fn glob_match(pattern: &str, input: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = input.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);
    while t < text.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}
