// SPDX-License-Identifier: Apache-2.0
//! In-memory reference implementation of [`PersistencePort`].
//!
//! [`MemoryStore`] is a content-addressed commit/blob/tree store plus a ref
//! table, sufficient for tests, demos, and single-process replicas. Object
//! ids are SHA-256 over kind-prefixed content, so identical content yields
//! identical ids (deduplication) while commits, blobs, and trees can never
//! collide across kinds.
//!
//! All state sits behind one `RwLock`; ref updates are therefore atomic with
//! respect to each other, which is the only concurrency guarantee the engine
//! asks of a backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

use crate::{NodeInfo, Oid, PersistencePort, RefRecord, StoreError};

#[derive(Debug, Clone)]
struct StoredCommit {
    message: String,
    parents: Vec<Oid>,
}

#[derive(Debug, Default)]
struct Inner {
    commits: HashMap<Oid, StoredCommit>,
    blobs: HashMap<Oid, Arc<[u8]>>,
    trees: HashMap<Oid, BTreeMap<String, Oid>>,
    refs: BTreeMap<String, Oid>,
    config: BTreeMap<String, String>,
}

/// In-memory [`PersistencePort`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commit objects stored.
    pub fn commit_count(&self) -> usize {
        self.read().commits.len()
    }

    /// Number of blob objects stored.
    pub fn blob_count(&self) -> usize {
        self.read().blobs.len()
    }

    /// Replaces a blob's bytes in place, keeping its id.
    ///
    /// This deliberately breaks the content-addressing invariant; it exists
    /// so tests can simulate on-disk corruption (e.g. seek-cache self-heal).
    pub fn corrupt_blob_for_test(&self, oid: &Oid, bytes: &[u8]) {
        self.write().blobs.insert(oid.clone(), Arc::from(bytes));
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn oid_for(kind: &str, payload: &[u8]) -> Oid {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\0");
    hasher.update(payload);
    // hex of a SHA-256 digest is always a valid 64-char oid.
    Oid(hex::encode(hasher.finalize()))
}

#[async_trait::async_trait]
impl PersistencePort for MemoryStore {
    async fn commit_node(
        &self,
        message: &str,
        parents: &[Oid],
        _sign: bool,
    ) -> Result<Oid, StoreError> {
        let mut payload = Vec::new();
        for p in parents {
            payload.extend_from_slice(p.as_str().as_bytes());
            payload.push(b'\n');
        }
        payload.push(b'\0');
        payload.extend_from_slice(message.as_bytes());
        let oid = oid_for("commit", &payload);
        self.write().commits.insert(
            oid.clone(),
            StoredCommit {
                message: message.to_owned(),
                parents: parents.to_vec(),
            },
        );
        Ok(oid)
    }

    async fn read_ref(&self, name: &str) -> Result<Option<Oid>, StoreError> {
        Ok(self.read().refs.get(name).cloned())
    }

    async fn update_ref(&self, name: &str, target: &Oid) -> Result<(), StoreError> {
        if name.is_empty() || name.contains("..") {
            return Err(StoreError::InvalidRef(name.to_owned()));
        }
        self.write().refs.insert(name.to_owned(), target.clone());
        Ok(())
    }

    async fn delete_ref(&self, name: &str) -> Result<(), StoreError> {
        self.write().refs.remove(name);
        Ok(())
    }

    async fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>, StoreError> {
        self.read()
            .blobs
            .get(oid)
            .map(|b| b.to_vec())
            .ok_or_else(|| StoreError::ObjectMissing(oid.clone()))
    }

    async fn write_blob(&self, bytes: &[u8]) -> Result<Oid, StoreError> {
        let oid = oid_for("blob", bytes);
        self.write().blobs.insert(oid.clone(), Arc::from(bytes));
        Ok(oid)
    }

    async fn read_tree(&self, oid: &Oid) -> Result<BTreeMap<String, Oid>, StoreError> {
        self.read()
            .trees
            .get(oid)
            .cloned()
            .ok_or_else(|| StoreError::ObjectMissing(oid.clone()))
    }

    async fn write_tree(&self, entries: &BTreeMap<String, Oid>) -> Result<Oid, StoreError> {
        let mut payload = Vec::new();
        for (name, target) in entries {
            payload.extend_from_slice(name.as_bytes());
            payload.push(b'\0');
            payload.extend_from_slice(target.as_str().as_bytes());
            payload.push(b'\n');
        }
        let oid = oid_for("tree", &payload);
        self.write().trees.insert(oid.clone(), entries.clone());
        Ok(oid)
    }

    async fn get_node_info(&self, sha: &Oid) -> Result<NodeInfo, StoreError> {
        let guard = self.read();
        let commit = guard
            .commits
            .get(sha)
            .ok_or_else(|| StoreError::ObjectMissing(sha.clone()))?;
        Ok(NodeInfo {
            sha: sha.clone(),
            message: commit.message.clone(),
            parents: commit.parents.clone(),
        })
    }

    async fn list_refs(&self, prefix: &str) -> Result<Vec<RefRecord>, StoreError> {
        Ok(self
            .read()
            .refs
            .range(prefix.to_owned()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, target)| RefRecord {
                name: name.clone(),
                target: target.clone(),
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn count_nodes(&self, name: &str) -> Result<u64, StoreError> {
        let guard = self.read();
        let Some(tip) = guard.refs.get(name) else {
            return Ok(0);
        };
        let mut seen: HashSet<Oid> = HashSet::new();
        let mut queue = vec![tip.clone()];
        while let Some(sha) = queue.pop() {
            if !seen.insert(sha.clone()) {
                continue;
            }
            let commit = guard
                .commits
                .get(&sha)
                .ok_or_else(|| StoreError::ObjectMissing(sha.clone()))?;
            queue.extend(commit.parents.iter().cloned());
        }
        Ok(u64::try_from(seen.len()).unwrap_or(u64::MAX))
    }

    async fn config_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read().config.get(key).cloned())
    }

    async fn config_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write()
            .config
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── 1. blob round-trip ───────────────────────────────────────────────

    #[tokio::test]
    async fn blob_round_trip() {
        let store = MemoryStore::new();
        let oid = store.write_blob(b"hello warp").await.unwrap();
        assert_eq!(store.read_blob(&oid).await.unwrap(), b"hello warp");
    }

    // ── 2. blob writes deduplicate ───────────────────────────────────────

    #[tokio::test]
    async fn blob_dedup() {
        let store = MemoryStore::new();
        let a = store.write_blob(b"same bytes").await.unwrap();
        let b = store.write_blob(b"same bytes").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.blob_count(), 1);
    }

    // ── 3. missing blob is an error ──────────────────────────────────────

    #[tokio::test]
    async fn missing_blob_errors() {
        let store = MemoryStore::new();
        let oid = Oid::parse(&"0".repeat(64)).unwrap();
        assert!(matches!(
            store.read_blob(&oid).await,
            Err(StoreError::ObjectMissing(_))
        ));
    }

    // ── 4. commit chain and node info ────────────────────────────────────

    #[tokio::test]
    async fn commit_chain_round_trip() {
        let store = MemoryStore::new();
        let root = store.commit_node("root", &[], false).await.unwrap();
        let child = store
            .commit_node("child", std::slice::from_ref(&root), false)
            .await
            .unwrap();
        let info = store.get_node_info(&child).await.unwrap();
        assert_eq!(info.message, "child");
        assert_eq!(info.parents, vec![root]);
    }

    // ── 5. refs: read / update / delete / list ───────────────────────────

    #[tokio::test]
    async fn ref_lifecycle() {
        let store = MemoryStore::new();
        let oid = store.commit_node("c", &[], false).await.unwrap();
        assert_eq!(store.read_ref("refs/warp/g/writers/a").await.unwrap(), None);
        store
            .update_ref("refs/warp/g/writers/a", &oid)
            .await
            .unwrap();
        store
            .update_ref("refs/warp/g/writers/b", &oid)
            .await
            .unwrap();
        store.update_ref("refs/other/x", &oid).await.unwrap();

        let listed = store.list_refs("refs/warp/g/").await.unwrap();
        assert_eq!(
            listed.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["refs/warp/g/writers/a", "refs/warp/g/writers/b"]
        );

        store.delete_ref("refs/warp/g/writers/a").await.unwrap();
        assert_eq!(store.read_ref("refs/warp/g/writers/a").await.unwrap(), None);
        // Deleting again is a no-op.
        store.delete_ref("refs/warp/g/writers/a").await.unwrap();
    }

    // ── 6. count_nodes walks full ancestry ───────────────────────────────

    #[tokio::test]
    async fn count_nodes_full_ancestry() {
        let store = MemoryStore::new();
        let a = store.commit_node("a", &[], false).await.unwrap();
        let b = store
            .commit_node("b", std::slice::from_ref(&a), false)
            .await
            .unwrap();
        let c = store
            .commit_node("c", std::slice::from_ref(&b), false)
            .await
            .unwrap();
        store.update_ref("refs/warp/g/writers/w", &c).await.unwrap();
        assert_eq!(store.count_nodes("refs/warp/g/writers/w").await.unwrap(), 3);
        assert_eq!(store.count_nodes("refs/warp/missing").await.unwrap(), 0);
    }

    // ── 7. tree round-trip ───────────────────────────────────────────────

    #[tokio::test]
    async fn tree_round_trip() {
        let store = MemoryStore::new();
        let blob = store.write_blob(b"x").await.unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("state".to_owned(), blob.clone());
        entries.insert("frontier".to_owned(), blob);
        let oid = store.write_tree(&entries).await.unwrap();
        assert_eq!(store.read_tree(&oid).await.unwrap(), entries);
    }

    // ── 8. config round-trip ─────────────────────────────────────────────

    #[tokio::test]
    async fn config_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.config_get("warp.schema").await.unwrap(), None);
        store.config_set("warp.schema", "3").await.unwrap();
        assert_eq!(
            store.config_get("warp.schema").await.unwrap(),
            Some("3".to_owned())
        );
    }

    // ── 9. corrupt_blob_for_test keeps the oid, changes the bytes ────────

    #[tokio::test]
    async fn corruption_hook() {
        let store = MemoryStore::new();
        let oid = store.write_blob(b"good bytes").await.unwrap();
        store.corrupt_blob_for_test(&oid, b"bad");
        assert_eq!(store.read_blob(&oid).await.unwrap(), b"bad");
    }
}
