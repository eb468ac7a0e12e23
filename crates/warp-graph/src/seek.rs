// SPDX-License-Identifier: Apache-2.0
//! Seek cache: content-addressed snapshots of ceiling-bounded
//! materializations.
//!
//! Cache keys are deterministic over `(ceiling, frontier)`:
//! `v1:t<ceiling>-<sha256Hex(sorted "writer:sha" pairs joined by \n)>`.
//! The `v1:` prefix isolates future schema changes from existing entries.
//!
//! Entries live under the graph's `seek-cache` ref: the ref points at a
//! canonical-CBOR blob mapping `key → state blob oid`, and each state blob
//! holds a full-state serialization. All failures are non-fatal: decode
//! errors delete the offending key (self-healing) and fall through to a full
//! materialization; read/write errors just fall through.

use ciborium::value::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use warp_store::{Oid, PersistencePort};

use crate::canonical;
use crate::frontier::Frontier;
use crate::ident::GraphName;
use crate::refs::seek_cache_ref;
use crate::state::WarpState;
use crate::wire;

/// Builds the deterministic cache key for `(ceiling, frontier)`.
#[must_use]
pub fn cache_key(ceiling: u64, frontier: &Frontier) -> String {
    let pairs: Vec<String> = frontier
        .iter()
        .map(|(writer, sha)| format!("{writer}:{sha}"))
        .collect();
    let digest = Sha256::digest(pairs.join("\n").as_bytes());
    format!("v1:t{ceiling}-{}", hex::encode(digest))
}

/// Seek cache handle for one graph.
#[derive(Debug, Clone)]
pub struct SeekCache {
    ref_name: String,
}

impl SeekCache {
    /// Creates the cache handle for `graph`.
    #[must_use]
    pub fn new(graph: &GraphName) -> Self {
        Self {
            ref_name: seek_cache_ref(graph),
        }
    }

    /// The ref this cache lives under.
    #[must_use]
    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    // Reads the key → blob-oid table. Any failure reads as an empty table.
    async fn read_table(&self, store: &dyn PersistencePort) -> Vec<(String, Oid)> {
        let Ok(Some(table_oid)) = store.read_ref(&self.ref_name).await else {
            return Vec::new();
        };
        let Ok(bytes) = store.read_blob(&table_oid).await else {
            return Vec::new();
        };
        let Ok(value) = canonical::decode_value(&bytes) else {
            return Vec::new();
        };
        let Value::Map(entries) = value else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|(k, v)| {
                let key = wire::as_text(k, "seek key").ok()?;
                let oid = Oid::parse(wire::as_text(v, "seek oid").ok()?).ok()?;
                Some((key.to_owned(), oid))
            })
            .collect()
    }

    async fn write_table(&self, store: &dyn PersistencePort, table: &[(String, Oid)]) {
        let value = Value::Map(
            table
                .iter()
                .map(|(k, v)| {
                    (
                        Value::Text(k.clone()),
                        Value::Text(v.as_str().to_owned()),
                    )
                })
                .collect(),
        );
        let Ok(bytes) = canonical::encode_value(&value) else {
            return;
        };
        let Ok(table_oid) = store.write_blob(&bytes).await else {
            return;
        };
        // A failed ref update leaves the previous table in place; the cache
        // is best-effort either way.
        let _ = store.update_ref(&self.ref_name, &table_oid).await;
    }

    /// Looks up a cached state. Corrupt entries are deleted and read as a
    /// miss; every other failure is also a miss.
    pub async fn lookup(&self, store: &dyn PersistencePort, key: &str) -> Option<WarpState> {
        let table = self.read_table(store).await;
        let state_oid = table.iter().find(|(k, _)| k == key)?.1.clone();
        let bytes = store.read_blob(&state_oid).await.ok()?;
        match WarpState::decode_full(&bytes) {
            Ok(state) => {
                debug!(key, "seek cache hit");
                Some(state)
            }
            Err(_) => {
                debug!(key, "seek cache entry corrupt, self-healing");
                self.delete(store, key).await;
                None
            }
        }
    }

    /// Stores a state under `key`. Best-effort: failures are swallowed.
    pub async fn store_entry(&self, store: &dyn PersistencePort, key: &str, state: &WarpState) {
        let Ok(bytes) = state.encode_full() else {
            return;
        };
        let Ok(state_oid) = store.write_blob(&bytes).await else {
            return;
        };
        let mut table = self.read_table(store).await;
        table.retain(|(k, _)| k != key);
        table.push((key.to_owned(), state_oid));
        table.sort();
        self.write_table(store, &table).await;
    }

    /// Removes `key` from the table. Best-effort.
    pub async fn delete(&self, store: &dyn PersistencePort, key: &str) {
        let mut table = self.read_table(store).await;
        let before = table.len();
        table.retain(|(k, _)| k != key);
        if table.len() != before {
            self.write_table(store, &table).await;
        }
    }
}
