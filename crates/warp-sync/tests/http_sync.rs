// SPDX-License-Identifier: Apache-2.0
//! HTTP sync server and client integration tests.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::Mutex;
use tower::ServiceExt;
use warp_graph::{
    GraphName, GraphOptions, MaterializeOptions, SyncRequest, WarpGraph, WriterId,
    SYNC_REQUEST_TYPE,
};
use warp_store::{FixedClock, MemoryStore, PersistencePort, StdCrypto};
use warp_sync::{
    sign_request, sync_router, AuthConfig, AuthMode, AuthService, SyncServerConfig,
};

const NOW_MS: i64 = 1_700_000_000_000;
const NONCE_A: &str = "7f9c2ba4-e88f-4a6a-8e07-c7889ca2d1a3";
const NONCE_B: &str = "1c0b7c2a-93b1-4ff0-9dce-0e8e5a1b2c3d";

async fn seeded_graph(nodes: &[&str]) -> (Arc<MemoryStore>, WarpGraph) {
    let store = Arc::new(MemoryStore::new());
    let port: Arc<dyn PersistencePort> = store.clone();
    let mut graph = WarpGraph::open(
        port,
        GraphName::parse("g").unwrap(),
        WriterId::parse("alice").unwrap(),
        GraphOptions::default(),
    );
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
    (store, graph)
}

fn empty_sync_request_body() -> Vec<u8> {
    serde_json::to_vec(&SyncRequest {
        kind: SYNC_REQUEST_TYPE.to_owned(),
        frontier: BTreeMap::new(),
    })
    .unwrap()
}

fn auth_service(mode: AuthMode, allowed: Option<&[&str]>) -> Arc<AuthService> {
    let mut keys = BTreeMap::new();
    keys.insert("key-1".to_owned(), b"topsecret".to_vec());
    Arc::new(AuthService::new(
        AuthConfig {
            keys,
            mode,
            allowed_writers: allowed
                .map(|list| list.iter().map(|s| (*s).to_owned()).collect()),
            ..AuthConfig::default()
        },
        Arc::new(StdCrypto::new()),
        Arc::new(FixedClock::at(NOW_MS)),
    ))
}

fn post(path: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn signed_post(path: &str, body: Vec<u8>, nonce: &str, ts: i64) -> Request<Body> {
    let headers = sign_request(
        &StdCrypto::new(),
        "key-1",
        b"topsecret",
        "POST",
        path,
        "application/json",
        &body,
        ts,
        nonce,
    );
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ── Route / method / parse / size gates ─────────────────────────────────

#[tokio::test]
async fn route_method_and_parse_errors() {
    let (_store, graph) = seeded_graph(&["a"]).await;
    let router = sync_router(
        Arc::new(Mutex::new(graph)),
        None,
        SyncServerConfig::default(),
    );

    let res = router
        .clone()
        .oneshot(post("/other", empty_sync_request_body()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    let res = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sync")
                .header("content-type", "text/plain")
                .body(Body::from("hi"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = router
        .clone()
        .oneshot(post("/sync", b"{not json".to_vec()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = body_string(res).await;
    assert!(body.contains("error"));
}

#[tokio::test]
async fn oversize_body_is_413_before_auth() {
    let (_store, graph) = seeded_graph(&["a"]).await;
    // Auth configured, but the size gate must fire first: an oversize body
    // with no auth headers yields 413, not 401.
    let auth = auth_service(AuthMode::Enforce, None);
    let router = sync_router(
        Arc::new(Mutex::new(graph)),
        Some(Arc::clone(&auth)),
        SyncServerConfig {
            max_body_bytes: 64,
            ..SyncServerConfig::default()
        },
    );
    let res = router
        .oneshot(post("/sync", vec![b'x'; 1024]))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    // No auth counter moved: the request never reached the pipeline.
    assert_eq!(auth.counters().format_rejects, 0);
}

// ── Unauthenticated happy path ──────────────────────────────────────────

#[tokio::test]
async fn open_server_answers_with_canonical_json() {
    let (_store, graph) = seeded_graph(&["a", "b"]).await;
    let router = sync_router(
        Arc::new(Mutex::new(graph)),
        None,
        SyncServerConfig::default(),
    );
    let res = router
        .oneshot(post("/sync", empty_sync_request_body()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_string(res).await;
    let parsed: warp_graph::SyncResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed.patches.len(), 2);
    // Canonical JSON: top-level keys sorted.
    let frontier_pos = body.find("\"frontier\"").unwrap();
    let patches_pos = body.find("\"patches\"").unwrap();
    let type_pos = body.find("\"type\"").unwrap();
    assert!(frontier_pos < patches_pos && patches_pos < type_pos);
}

// ── S6: signed request, then replay ─────────────────────────────────────

#[tokio::test]
async fn s6_signed_replay_rejected() {
    let (_store, graph) = seeded_graph(&["a"]).await;
    let auth = auth_service(AuthMode::Enforce, None);
    let router = sync_router(
        Arc::new(Mutex::new(graph)),
        Some(Arc::clone(&auth)),
        SyncServerConfig::default(),
    );

    let body = empty_sync_request_body();
    let res = router
        .clone()
        .oneshot(signed_post("/sync", body.clone(), NONCE_A, NOW_MS))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Identical signed request again: replay.
    let res = router
        .clone()
        .oneshot(signed_post("/sync", body, NONCE_A, NOW_MS))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(body_string(res).await.contains("replay"));
    assert_eq!(auth.counters().replay_rejects, 1);
}

#[tokio::test]
async fn skewed_timestamp_rejected() {
    let (_store, graph) = seeded_graph(&["a"]).await;
    let auth = auth_service(AuthMode::Enforce, None);
    let router = sync_router(
        Arc::new(Mutex::new(graph)),
        Some(Arc::clone(&auth)),
        SyncServerConfig::default(),
    );
    let res = router
        .oneshot(signed_post(
            "/sync",
            empty_sync_request_body(),
            NONCE_A,
            NOW_MS - 6 * 60 * 1000,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(auth.counters().skew_rejects, 1);
}

#[tokio::test]
async fn missing_auth_is_401_and_log_only_passes() {
    let (_store, graph) = seeded_graph(&["a"]).await;
    let auth = auth_service(AuthMode::Enforce, None);
    let router = sync_router(
        Arc::new(Mutex::new(graph)),
        Some(auth),
        SyncServerConfig::default(),
    );
    let res = router
        .oneshot(post("/sync", empty_sync_request_body()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let (_store, graph) = seeded_graph(&["a"]).await;
    let log_only = auth_service(AuthMode::LogOnly, None);
    let router = sync_router(
        Arc::new(Mutex::new(graph)),
        Some(Arc::clone(&log_only)),
        SyncServerConfig::default(),
    );
    let res = router
        .oneshot(post("/sync", empty_sync_request_body()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(log_only.counters().passthroughs, 1);
}

#[tokio::test]
async fn writer_allow_list_rejects_foreign_writers() {
    let (_store, graph) = seeded_graph(&["a"]).await;
    let auth = auth_service(AuthMode::Enforce, Some(&["alice"]));
    let router = sync_router(
        Arc::new(Mutex::new(graph)),
        Some(auth),
        SyncServerConfig::default(),
    );

    // A frontier naming a forbidden writer is rejected with 403.
    let mut frontier = BTreeMap::new();
    frontier.insert("mallory".to_owned(), "a".repeat(64));
    let body = serde_json::to_vec(&SyncRequest {
        kind: SYNC_REQUEST_TYPE.to_owned(),
        frontier,
    })
    .unwrap();
    let res = router
        .clone()
        .oneshot(signed_post("/sync", body, NONCE_A, NOW_MS))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // The allowed writer passes.
    let res = router
        .oneshot(signed_post(
            "/sync",
            empty_sync_request_body(),
            NONCE_B,
            NOW_MS,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

// ── Full client round over a live listener ──────────────────────────────

#[tokio::test]
async fn client_syncs_against_live_server() {
    let (_store_a, graph_a) = seeded_graph(&["n1", "n2", "n3"]).await;
    let server_graph = Arc::new(Mutex::new(graph_a));
    let router = sync_router(
        Arc::clone(&server_graph),
        None,
        SyncServerConfig::default(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let store_b = Arc::new(MemoryStore::new());
    let port: Arc<dyn PersistencePort> = store_b.clone();
    let mut graph_b = WarpGraph::open(
        port,
        GraphName::parse("g").unwrap(),
        WriterId::parse("bob").unwrap(),
        GraphOptions::default(),
    );
    graph_b
        .materialize(MaterializeOptions::default())
        .await
        .unwrap();

    let client = warp_sync::SyncClient::new(
        warp_sync::SyncClientConfig::new(format!("http://{addr}/sync")),
        Arc::new(StdCrypto::new()),
        Arc::new(warp_store::SystemClock::new()),
    )
    .unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let applied = client.sync_with(&mut graph_b, &cancel).await.unwrap();
    assert_eq!(applied.applied, 3);
    assert!(graph_b.has_node("n1").await.unwrap());
    assert!(graph_b.has_node("n3").await.unwrap());

    // A pre-cancelled token aborts without touching the wire.
    let cancelled = tokio_util::sync::CancellationToken::new();
    cancelled.cancel();
    let err = client.sync_with(&mut graph_b, &cancelled).await.unwrap_err();
    assert!(matches!(err, warp_sync::SyncError::Aborted));
}
