// SPDX-License-Identifier: Apache-2.0
//! Thin HTTP sync server.
//!
//! One POST route, JSON in, canonical JSON out (sorted keys). The handler is
//! a composer, in order: route, method, content type, body size (**before**
//! authentication, so oversize bodies never reach cryptographic work),
//! parse, authorize, dispatch to the graph's sync handler, canonicalize the
//! response. Errors render as `{"error": <message>}` with the standard
//! status codes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use warp_graph::{SyncRequest, WarpGraph};

use crate::auth::{AuthDecision, AuthService, RequestAuth};

/// Default sync route.
pub const DEFAULT_SYNC_PATH: &str = "/sync";
/// Default request body limit: 4 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
/// Hard cap on the configurable body limit: 128 MiB.
pub const MAX_BODY_BYTES_CAP: usize = 128 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct SyncServerConfig {
    /// Route the server answers on.
    pub path: String,
    /// Request body limit in bytes (clamped to [`MAX_BODY_BYTES_CAP`]).
    pub max_body_bytes: usize,
}

impl Default for SyncServerConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_SYNC_PATH.to_owned(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Clone)]
struct AppState {
    graph: Arc<Mutex<WarpGraph>>,
    auth: Option<Arc<AuthService>>,
    path: String,
    max_body_bytes: usize,
}

/// Builds the axum router for one graph.
///
/// `auth` of `None` serves unauthenticated peers; otherwise every request
/// passes the [`AuthService`] pipeline before dispatch.
pub fn sync_router(
    graph: Arc<Mutex<WarpGraph>>,
    auth: Option<Arc<AuthService>>,
    config: SyncServerConfig,
) -> Router {
    let state = AppState {
        graph,
        auth,
        path: config.path.clone(),
        max_body_bytes: config.max_body_bytes.min(MAX_BODY_BYTES_CAP),
    };
    // The fallback sees every request, which keeps the 404/405/413 ordering
    // in one place instead of spread across axum layers.
    Router::new().fallback(handle).with_state(state)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "error": message });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn handle(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    // Route, then method.
    let canonical_path = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_owned(), ToString::to_string);
    if parts.uri.path() != state.path {
        return error_response(StatusCode::NOT_FOUND, "unknown route");
    }
    if parts.method != Method::POST {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "POST required");
    }

    // Content type.
    let content_type = parts
        .headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_owned();
    if !content_type.starts_with("application/json") {
        return error_response(StatusCode::BAD_REQUEST, "content-type must be application/json");
    }

    // Body size gate runs before authentication: oversize traffic must not
    // reach HMAC computation.
    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };

    // Parse.
    let sync_request: SyncRequest = match serde_json::from_slice(&bytes) {
        Ok(req) => req,
        Err(e) => {
            debug!(error = %e, "malformed sync request");
            return error_response(StatusCode::BAD_REQUEST, "malformed sync request");
        }
    };

    // Authorize.
    if let Some(auth) = &state.auth {
        let mut auth_headers = BTreeMap::new();
        for (name, value) in &parts.headers {
            if let Ok(v) = value.to_str() {
                auth_headers.insert(name.as_str().to_ascii_lowercase(), v.to_owned());
            }
        }
        let decision = auth.verify(&RequestAuth {
            method: parts.method.as_str(),
            canonical_path: &canonical_path,
            content_type: &content_type,
            body: &bytes,
            headers: &auth_headers,
        });
        if let AuthDecision::Deny(failure) = decision {
            warn!(failure = %failure, "sync request denied");
            let status =
                StatusCode::from_u16(failure.status()).unwrap_or(StatusCode::UNAUTHORIZED);
            return error_response(status, &failure.to_string());
        }
        // Writer allow-list applies to the payload's frontier.
        let writers = sync_request.frontier.keys().map(String::as_str);
        if let AuthDecision::Deny(failure) = auth.check_writers(writers) {
            warn!(failure = %failure, "sync request writer denied");
            let status = StatusCode::from_u16(failure.status()).unwrap_or(StatusCode::FORBIDDEN);
            return error_response(status, &failure.to_string());
        }
    }

    // Dispatch.
    let response = {
        let graph = state.graph.lock().await;
        graph.handle_sync_request(&sync_request).await
    };
    match response {
        Ok(sync_response) => match canonical_json(&sync_response) {
            Ok(body) => (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(e) => {
                warn!(error = %e, "sync response serialization failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        },
        Err(e) => {
            warn!(error = %e, "sync dispatch failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

// Canonical JSON: serialize through serde_json::Value, whose object map is
// BTreeMap-backed, so keys come out sorted at every depth.
fn canonical_json<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}
