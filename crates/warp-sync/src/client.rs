// SPDX-License-Identifier: Apache-2.0
//! Retrying sync client.
//!
//! One sync round: build the local frontier request, sign it (when
//! configured), POST it to the peer, and fold the response into the local
//! graph. Transport failures, timeouts, and 5xx responses retry with
//! exponential backoff and decorrelated jitter; other 4xx responses are
//! final. Cancellation propagates through the retry loop and aborts an
//! in-flight attempt promptly.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warp_graph::{AppliedSync, GraphError, WarpGraph};
use warp_store::{ClockPort, CryptoPort};

use crate::auth::sign_request_now;

/// Sync transport errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The peer URL failed to parse or resolve. Not retryable.
    #[error("[E_SYNC_REMOTE_URL] invalid peer url: {0}")]
    RemoteUrl(String),
    /// The peer answered 5xx. Retryable.
    #[error("[E_SYNC_REMOTE] peer returned server error {status}")]
    Remote {
        /// HTTP status the peer answered with.
        status: u16,
    },
    /// The peer's answer was malformed or a final 4xx. Not retryable.
    #[error("[E_SYNC_PROTOCOL] protocol error: {0}")]
    Protocol(String),
    /// The per-attempt timeout elapsed. Retryable.
    #[error("[E_SYNC_TIMEOUT] attempt timed out after {0:?}")]
    Timeout(Duration),
    /// Connection-level failure. Retryable.
    #[error("[E_SYNC_NETWORK] network failure: {0}")]
    Network(String),
    /// The caller cancelled the sync.
    #[error("operation aborted: sync")]
    Aborted,
    /// Applying the response to the local graph failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl SyncError {
    /// `true` for failures the retry loop may try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Remote { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }
}

/// Client-side signing material.
#[derive(Debug, Clone)]
pub struct ClientAuth {
    /// Key id sent as `x-warp-key-id`.
    pub key_id: String,
    /// HMAC secret.
    pub secret: Vec<u8>,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Peer endpoint, e.g. `http://peer:4000/sync`.
    pub url: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retry attempts after the first (0 disables retries).
    pub max_retries: u32,
    /// Base backoff delay.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
    /// Optional request signing.
    pub auth: Option<ClientAuth>,
}

impl SyncClientConfig {
    /// Conservative defaults for `url`: 10 s timeout, 4 retries, 250 ms
    /// base backoff capped at 5 s, unsigned.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            max_retries: 4,
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(5),
            auth: None,
        }
    }
}

/// HTTP sync client for one peer.
pub struct SyncClient {
    http: reqwest::Client,
    config: SyncClientConfig,
    crypto: Arc<dyn CryptoPort>,
    clock: Arc<dyn ClockPort>,
}

impl SyncClient {
    /// Builds a client; fails fast on an unusable URL.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RemoteUrl`] when the URL does not parse as http
    /// or https.
    pub fn new(
        config: SyncClientConfig,
        crypto: Arc<dyn CryptoPort>,
        clock: Arc<dyn ClockPort>,
    ) -> Result<Self, SyncError> {
        let parsed = reqwest::Url::parse(&config.url)
            .map_err(|e| SyncError::RemoteUrl(format!("{}: {e}", config.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::RemoteUrl(format!(
                "{}: unsupported scheme",
                config.url
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self {
            http,
            config,
            crypto,
            clock,
        })
    }

    /// Runs one full sync round against the peer and applies the result.
    ///
    /// Requires the graph to hold a cached state (materialize first).
    pub async fn sync_with(
        &self,
        graph: &mut WarpGraph,
        cancel: &CancellationToken,
    ) -> Result<AppliedSync, SyncError> {
        let request = graph.build_sync_request().await?;
        let body = serde_json::to_vec(&request)
            .map_err(|e| SyncError::Protocol(format!("request serialization: {e}")))?;

        let response = self.post_with_retries(&body, cancel).await?;
        let applied = graph.apply_sync_response(&response).await?;
        info!(url = %self.config.url, applied = applied.applied, "sync round complete");
        Ok(applied)
    }

    async fn post_with_retries(
        &self,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<warp_graph::SyncResponse, SyncError> {
        let mut attempt: u32 = 0;
        let mut previous_delay = self.config.backoff_base;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Aborted);
            }
            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(SyncError::Aborted),
                outcome = self.post_once(body) => outcome,
            };
            match outcome {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = decorrelated_jitter(
                        self.config.backoff_base,
                        previous_delay,
                        self.config.backoff_cap,
                    );
                    previous_delay = delay;
                    warn!(
                        url = %self.config.url,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "sync attempt failed, backing off"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(SyncError::Aborted),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn post_once(&self, body: &[u8]) -> Result<warp_graph::SyncResponse, SyncError> {
        let mut request = self
            .http
            .post(&self.config.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());

        if let Some(auth) = &self.config.auth {
            let parsed = reqwest::Url::parse(&self.config.url)
                .map_err(|e| SyncError::RemoteUrl(e.to_string()))?;
            let canonical_path = match parsed.query() {
                Some(q) => format!("{}?{q}", parsed.path()),
                None => parsed.path().to_owned(),
            };
            // Fresh timestamp and nonce per attempt: a retried request must
            // not trip the peer's replay cache.
            let signed = sign_request_now(
                self.crypto.as_ref(),
                self.clock.as_ref(),
                &auth.key_id,
                &auth.secret,
                "POST",
                &canonical_path,
                "application/json",
                body,
            );
            for (name, value) in signed {
                request = request.header(name, value);
            }
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Timeout(self.config.timeout)
            } else {
                SyncError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SyncError::Remote {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SyncError::Protocol(format!("status {status}: {detail}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        let sync_response: warp_graph::SyncResponse = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Protocol(format!("malformed response: {e}")))?;
        debug!(patches = sync_response.patches.len(), "received sync response");
        Ok(sync_response)
    }
}

// Decorrelated jitter: sleep = min(cap, uniform(base, prev * 3)).
fn decorrelated_jitter(base: Duration, previous: Duration, cap: Duration) -> Duration {
    let base_ms = base.as_millis().max(1);
    let upper_ms = previous.as_millis().saturating_mul(3).max(base_ms + 1);
    let chosen = rand::thread_rng().gen_range(base_ms..upper_ms);
    Duration::from_millis(u64::try_from(chosen.min(cap.as_millis())).unwrap_or(u64::MAX))
}
