// SPDX-License-Identifier: Apache-2.0
//! Orchestrator contract: cache guards, status purity, checkpoints, views,
//! temporal predicates, seek cache, audit trail.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use ciborium::value::Value;
use warp_graph::{
    GraphError, GraphName, GraphOptions, MaterializeOptions, StateFreshness, ViewOptions,
    WarpGraph, WriterId,
};
use warp_store::{MemoryStore, PersistencePort};

fn open(store: &Arc<MemoryStore>, writer: &str, options: GraphOptions) -> WarpGraph {
    let port: Arc<dyn PersistencePort> = store.clone();
    WarpGraph::open(
        port,
        GraphName::parse("g").unwrap(),
        WriterId::parse(writer).unwrap(),
        options,
    )
}

async fn seed(graph: &mut WarpGraph, nodes: &[&str]) {
    for node in nodes {
        graph
            .create_patch()
            .await
            .unwrap()
            .add_node(node)
            .unwrap()
            .commit()
            .await
            .unwrap();
    }
}

// ── Cache guards ────────────────────────────────────────────────────────

#[tokio::test]
async fn queries_fail_without_state() {
    let store = Arc::new(MemoryStore::new());
    let mut writer = open(&store, "w", GraphOptions::default());
    seed(&mut writer, &["a"]).await;

    let mut reader = open(&store, "r", GraphOptions::default());
    let err = reader.has_node("a").await.unwrap_err();
    assert!(matches!(err, GraphError::NoState));
    assert!(err.to_string().contains("E_NO_STATE"));
    assert!(err.to_string().contains("materialize"));
    assert!(err.to_string().contains("auto_materialize"));
}

#[tokio::test]
async fn queries_fail_on_stale_state() {
    let store = Arc::new(MemoryStore::new());
    let mut reader = open(&store, "r", GraphOptions::default());
    reader.materialize(MaterializeOptions::default()).await.unwrap();

    let mut writer = open(&store, "w", GraphOptions::default());
    seed(&mut writer, &["late"]).await;

    let err = reader.has_node("late").await.unwrap_err();
    assert!(matches!(err, GraphError::StaleState));
    assert!(err.to_string().contains("E_STALE_STATE"));

    // A fresh materialize clears the guard.
    reader.materialize(MaterializeOptions::default()).await.unwrap();
    assert!(reader.has_node("late").await.unwrap());
}

#[tokio::test]
async fn auto_materialize_refreshes_transparently() {
    let store = Arc::new(MemoryStore::new());
    let mut writer = open(&store, "w", GraphOptions::default());
    seed(&mut writer, &["a"]).await;

    let mut reader = open(
        &store,
        "r",
        GraphOptions {
            auto_materialize: true,
            ..GraphOptions::default()
        },
    );
    // Never materialized: the query triggers it.
    assert!(reader.has_node("a").await.unwrap());

    seed(&mut writer, &["b"]).await;
    // Stale: the query refreshes again.
    assert!(reader.has_node("b").await.unwrap());
}

// ── Status purity ───────────────────────────────────────────────────────

#[tokio::test]
async fn status_never_materializes() {
    let store = Arc::new(MemoryStore::new());
    let mut writer = open(&store, "w", GraphOptions::default());
    seed(&mut writer, &["a", "b"]).await;

    let reader = open(
        &store,
        "r",
        GraphOptions {
            auto_materialize: true,
            ..GraphOptions::default()
        },
    );
    let status = reader.status().await.unwrap();
    assert_eq!(status.cached_state, StateFreshness::None);
    assert_eq!(status.writers, 1);
    assert!(status.frontier.contains_key(&WriterId::parse("w").unwrap()));
    // Still no cached state afterwards: status did not materialize.
    let status = reader.status().await.unwrap();
    assert_eq!(status.cached_state, StateFreshness::None);
}

#[tokio::test]
async fn status_freshness_transitions() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    seed(&mut graph, &["a"]).await;
    assert_eq!(
        graph.status().await.unwrap().cached_state,
        StateFreshness::Fresh
    );

    let mut other = open(&store, "x", GraphOptions::default());
    seed(&mut other, &["b"]).await;
    assert_eq!(
        graph.status().await.unwrap().cached_state,
        StateFreshness::Stale
    );
    assert_eq!(graph.status().await.unwrap().writers, 2);
}

// ── Checkpoint, anchor, gc, cursors ─────────────────────────────────────

#[tokio::test]
async fn checkpoint_records_state_hash_and_resets_counter() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    seed(&mut graph, &["a", "b"]).await;

    assert_eq!(graph.status().await.unwrap().patches_since_checkpoint, 2);
    let checkpoint = graph.create_checkpoint().await.unwrap();
    assert_eq!(graph.status().await.unwrap().patches_since_checkpoint, 0);

    let summary = graph.materialize(MaterializeOptions::default()).await.unwrap();
    assert_eq!(checkpoint.state_hash, summary.state_hash);

    // The frontier blob round-trips.
    let frontier_bytes = store.read_blob(&checkpoint.frontier_oid).await.unwrap();
    let frontier = warp_graph::frontier::decode_frontier(&frontier_bytes).unwrap();
    assert_eq!(frontier.len(), 1);

    // checkpoints/head advanced and the message parses.
    let head = store
        .read_ref("refs/warp/g/checkpoints/head")
        .await
        .unwrap()
        .unwrap();
    let info = store.get_node_info(&head).await.unwrap();
    assert_eq!(
        warp_graph::detect_message_kind(&info.message),
        Some(warp_graph::MessageKind::Checkpoint)
    );

    // A second checkpoint chains onto the first.
    seed(&mut graph, &["c"]).await;
    let second = graph.create_checkpoint().await.unwrap();
    let info = store.get_node_info(&second.sha).await.unwrap();
    assert_eq!(info.parents, vec![checkpoint.sha]);
}

#[tokio::test]
async fn coverage_anchor_parents_are_writer_tips() {
    let store = Arc::new(MemoryStore::new());
    let mut alice = open(&store, "alice", GraphOptions::default());
    let mut bob = open(&store, "bob", GraphOptions::default());
    seed(&mut alice, &["a"]).await;
    seed(&mut bob, &["b"]).await;

    let anchor = alice.sync_coverage().await.unwrap().unwrap();
    let info = store.get_node_info(&anchor).await.unwrap();
    assert_eq!(info.parents.len(), 2);

    // materialize_at(anchor) reproduces the anchored state.
    let mut reader = open(&store, "r", GraphOptions::default());
    let summary = reader.materialize_at(&anchor).await.unwrap();
    assert_eq!(summary.patch_count, 2);

    // An empty graph yields no anchor.
    let other_store = Arc::new(MemoryStore::new());
    let mut empty = open(&other_store, "w", GraphOptions::default());
    assert!(empty.sync_coverage().await.unwrap().is_none());
}

#[tokio::test]
async fn gc_reports_and_clears_seek_cache() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    seed(&mut graph, &["a", "b"]).await;
    graph
        .create_patch()
        .await
        .unwrap()
        .remove_node("b")
        .unwrap()
        .commit()
        .await
        .unwrap();

    // Populate the seek cache with a ceiling-bounded materialize.
    graph
        .materialize(MaterializeOptions {
            ceiling: Some(2),
            ..MaterializeOptions::default()
        })
        .await
        .unwrap();
    assert!(store.read_ref("refs/warp/g/seek-cache").await.unwrap().is_some());

    graph.materialize(MaterializeOptions::default()).await.unwrap();
    let report = graph.gc().await.unwrap();
    assert!(report.seek_cache_cleared);
    assert!(report.tombstone_ratio > 0.0);
    assert!(store.read_ref("refs/warp/g/seek-cache").await.unwrap().is_none());

    // Second gc: nothing left to clear.
    assert!(!graph.gc().await.unwrap().seek_cache_cleared);
}

#[tokio::test]
async fn cursors_save_and_restore() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    seed(&mut graph, &["a"]).await;
    let checkpoint = graph.create_checkpoint().await.unwrap();

    let saved = graph.save_cursor("before-migration").await.unwrap().unwrap();
    assert_eq!(saved, checkpoint.sha);
    graph.set_active_cursor(&saved).await.unwrap();
    assert_eq!(graph.active_cursor().await.unwrap().unwrap(), saved);
    assert_eq!(
        store
            .read_ref("refs/warp/g/cursor/saved/before-migration")
            .await
            .unwrap()
            .unwrap(),
        saved
    );
}

// ── Seek cache behavior through the orchestrator ────────────────────────

#[tokio::test]
async fn seek_cache_hits_and_degrades_provenance() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    seed(&mut graph, &["a", "b", "c"]).await;

    let opts = MaterializeOptions {
        ceiling: Some(2),
        ..MaterializeOptions::default()
    };
    let first = graph.materialize(opts.clone()).await.unwrap();
    assert!(!first.from_seek_cache);
    assert_eq!(first.patch_count, 2);

    let second = graph.materialize(opts).await.unwrap();
    assert!(second.from_seek_cache);
    assert_eq!(second.state_hash, first.state_hash);

    // Provenance is degraded after a cache restore.
    let err = graph.patches_for("a").await.unwrap_err();
    assert!(matches!(err, GraphError::ProvenanceDegraded));
    assert!(err.to_string().contains("E_PROVENANCE_DEGRADED"));
    let err = graph.materialize_slice("a").await.unwrap_err();
    assert!(matches!(err, GraphError::ProvenanceDegraded));

    // Queries still work on the restored state.
    assert!(graph.has_node("a").await.unwrap());
    assert!(!graph.has_node("c").await.unwrap());

    // A full materialize restores provenance.
    graph.materialize(MaterializeOptions::default()).await.unwrap();
    assert_eq!(graph.patches_for("a").await.unwrap().len(), 1);
}

#[tokio::test]
async fn corrupt_seek_entry_self_heals() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    seed(&mut graph, &["a", "b"]).await;

    let opts = MaterializeOptions {
        ceiling: Some(2),
        ..MaterializeOptions::default()
    };
    let first = graph.materialize(opts.clone()).await.unwrap();

    // Corrupt the cached state blob behind the cache table.
    let table_oid = store
        .read_ref("refs/warp/g/seek-cache")
        .await
        .unwrap()
        .unwrap();
    let table_bytes = store.read_blob(&table_oid).await.unwrap();
    let table = warp_graph::decode_value(&table_bytes).unwrap();
    let ciborium::value::Value::Map(entries) = table else {
        panic!("seek table must be a map");
    };
    let ciborium::value::Value::Text(state_oid) = entries[0].1.clone() else {
        panic!("seek entry must be an oid");
    };
    store.corrupt_blob_for_test(
        &warp_store::Oid::parse(&state_oid).unwrap(),
        b"not a state",
    );

    // The corrupt entry is dropped and the fold still returns the right
    // state.
    let healed = graph.materialize(opts).await.unwrap();
    assert!(!healed.from_seek_cache);
    assert_eq!(healed.state_hash, first.state_hash);
}

// ── Receipts ────────────────────────────────────────────────────────────

#[tokio::test]
async fn receipts_and_seek_cache_are_mutually_exclusive() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    seed(&mut graph, &["a"]).await;

    let summary = graph
        .materialize(MaterializeOptions {
            ceiling: Some(5),
            receipts: true,
            cancel: None,
        })
        .await
        .unwrap();
    let receipts = summary.receipts.unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].writer, "w");
    // Receipts requested: nothing was cached.
    assert!(store.read_ref("refs/warp/g/seek-cache").await.unwrap().is_none());
}

// ── Views ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn glob_views_filter_nodes_edges_and_props() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    graph
        .create_patch()
        .await
        .unwrap()
        .add_node("user:alice")
        .unwrap()
        .add_node("user:bob")
        .unwrap()
        .add_node("group:ops")
        .unwrap()
        .add_edge("user:alice", "user:bob", "follows")
        .unwrap()
        .add_edge("user:alice", "group:ops", "member")
        .unwrap()
        .set_node_prop("user:alice", "name", Value::Text("Alice".into()))
        .unwrap()
        .set_node_prop("user:alice", "email", Value::Text("a@example.com".into()))
        .unwrap()
        .commit()
        .await
        .unwrap();

    let view = graph
        .view(
            "user:*",
            ViewOptions {
                expose: None,
                redact: vec!["email".into()],
            },
        )
        .await
        .unwrap();
    assert!(view.has_node("user:alice"));
    assert!(view.has_node("user:bob"));
    assert!(!view.has_node("group:ops"));
    // The member edge crosses the glob boundary: excluded.
    assert_eq!(view.edges().len(), 1);
    assert_eq!(view.edges()[0].label, "follows");
    let props = view.node_props("user:alice");
    assert_eq!(props.get("name"), Some(&Value::Text("Alice".into())));
    assert!(!props.contains_key("email"));
}

// ── Temporal predicates ─────────────────────────────────────────────────

#[tokio::test]
async fn temporal_predicates_over_history() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    seed(&mut graph, &["temp"]).await;
    graph
        .create_patch()
        .await
        .unwrap()
        .remove_node("temp")
        .unwrap()
        .commit()
        .await
        .unwrap();

    assert!(graph.eventually(None, |s| s.has_node("temp")).await.unwrap());
    assert!(!graph.always(None, |s| s.has_node("temp")).await.unwrap());
    // Bounded below the tombstone, the node exists at the end.
    assert!(graph.eventually(Some(1), |s| s.has_node("temp")).await.unwrap());
}

// ── Audit trail ─────────────────────────────────────────────────────────

#[tokio::test]
async fn audited_commit_writes_audit_record() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    let receipt = graph
        .create_patch()
        .await
        .unwrap()
        .add_node("n")
        .unwrap()
        .with_audit()
        .commit()
        .await
        .unwrap();

    let audit_sha = receipt.audit_sha.unwrap();
    let info = store.get_node_info(&audit_sha).await.unwrap();
    assert_eq!(info.parents, vec![receipt.sha]);
    let parsed = warp_graph::CommitMessage::parse(&info.message).unwrap();
    let warp_graph::CommitMessage::Audit(audit) = parsed else {
        panic!("expected audit message");
    };
    assert_eq!(audit.ops_digest.len(), 64);
    assert_eq!(audit.writer.as_str(), "w");
}

// ── Cancellation ────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_walk_aborts() {
    let store = Arc::new(MemoryStore::new());
    let mut graph = open(&store, "w", GraphOptions::default());
    seed(&mut graph, &["a", "b", "c"]).await;

    // A flag raised before the walk starts aborts at the first poll point.
    let cancel = warp_graph::CancelFlag::new();
    cancel.cancel();
    let err = graph
        .materialize(MaterializeOptions {
            ceiling: None,
            receipts: false,
            cancel: Some(cancel),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Aborted { .. }));
}
