// SPDX-License-Identifier: Apache-2.0
//! Replay-resistant HMAC request authentication.
//!
//! The canonical signing string is the pipe-delimited byte sequence
//!
//! ```text
//! warp-v1 | keyId | METHOD | canonicalPath | timestamp | nonce | contentType | sha256Hex(body)
//! ```
//!
//! signed with HMAC-SHA-256 and sent as `x-warp-signature`, alongside
//! `x-warp-sig-version`, `x-warp-key-id`, `x-warp-timestamp` (epoch ms) and
//! `x-warp-nonce` (UUID v4).
//!
//! Server-side verification short-circuits in a fixed order: header
//! presence/format, timestamp skew, key resolution, signature (constant
//! time), and — only after the signature passes — atomic nonce reservation
//! in a bounded LRU. The ordering keeps unauthenticated traffic from
//! consuming nonce slots and from triggering HMAC work on skewed requests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;
use warp_store::{ClockPort, CryptoPort};

/// Signature scheme version.
pub const SIG_VERSION: &str = "1";
/// Signing string prefix.
pub const SIG_PREFIX: &str = "warp-v1";

/// Header names of the auth scheme.
pub mod headers {
    /// Signature scheme version header.
    pub const SIG_VERSION: &str = "x-warp-sig-version";
    /// Key id header.
    pub const KEY_ID: &str = "x-warp-key-id";
    /// Epoch-millisecond timestamp header.
    pub const TIMESTAMP: &str = "x-warp-timestamp";
    /// UUID v4 nonce header.
    pub const NONCE: &str = "x-warp-nonce";
    /// Hex HMAC-SHA-256 signature header.
    pub const SIGNATURE: &str = "x-warp-signature";
}

/// Builds the canonical signing string.
#[must_use]
pub fn signing_string(
    key_id: &str,
    method: &str,
    canonical_path: &str,
    timestamp: &str,
    nonce: &str,
    content_type: &str,
    body_sha256_hex: &str,
) -> String {
    format!(
        "{SIG_PREFIX}|{key_id}|{method}|{canonical_path}|{timestamp}|{nonce}|{content_type}|{body_sha256_hex}"
    )
}

/// Signs a request with explicit timestamp and nonce.
///
/// Deterministic: the same inputs always produce the same header set.
#[must_use]
pub fn sign_request(
    crypto: &dyn CryptoPort,
    key_id: &str,
    secret: &[u8],
    method: &str,
    canonical_path: &str,
    content_type: &str,
    body: &[u8],
    timestamp_ms: i64,
    nonce: &str,
) -> BTreeMap<String, String> {
    let timestamp = timestamp_ms.to_string();
    let body_hash = crypto.sha256_hex(body);
    let string = signing_string(
        key_id,
        method,
        canonical_path,
        &timestamp,
        nonce,
        content_type,
        &body_hash,
    );
    let signature = hex::encode(crypto.hmac_sha256(secret, string.as_bytes()));
    let mut out = BTreeMap::new();
    out.insert(headers::SIG_VERSION.to_owned(), SIG_VERSION.to_owned());
    out.insert(headers::KEY_ID.to_owned(), key_id.to_owned());
    out.insert(headers::TIMESTAMP.to_owned(), timestamp);
    out.insert(headers::NONCE.to_owned(), nonce.to_owned());
    out.insert(headers::SIGNATURE.to_owned(), signature);
    out
}

/// Signs a request with a fresh UUID v4 nonce and the clock's current time.
#[must_use]
pub fn sign_request_now(
    crypto: &dyn CryptoPort,
    clock: &dyn ClockPort,
    key_id: &str,
    secret: &[u8],
    method: &str,
    canonical_path: &str,
    content_type: &str,
    body: &[u8],
) -> BTreeMap<String, String> {
    let nonce = uuid::Uuid::new_v4().to_string();
    sign_request(
        crypto,
        key_id,
        secret,
        method,
        canonical_path,
        content_type,
        body,
        clock.now_epoch_ms(),
        &nonce,
    )
}

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// A required auth header is absent.
    #[error("missing auth header: {0}")]
    MissingHeader(&'static str),
    /// An auth header failed its format check.
    #[error("malformed auth header: {0}")]
    BadHeaderFormat(&'static str),
    /// The timestamp is outside the permitted clock skew.
    #[error("timestamp outside permitted clock skew")]
    SkewExceeded,
    /// The key id is not registered.
    #[error("unknown key id")]
    UnknownKey,
    /// The signature does not match the canonical signing string.
    #[error("signature mismatch")]
    BadSignature,
    /// The nonce was already used.
    #[error("nonce replay")]
    Replay,
    /// The payload references a writer outside the allow-list.
    #[error("writer not allowed: {0}")]
    ForbiddenWriter(String),
}

impl AuthFailure {
    /// HTTP status this failure maps to.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingHeader(_)
            | Self::BadHeaderFormat(_)
            | Self::UnknownKey
            | Self::BadSignature => 401,
            Self::SkewExceeded | Self::Replay | Self::ForbiddenWriter(_) => 403,
        }
    }
}

/// Outcome of verifying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Request is authentic (or the service runs in log-only mode).
    Allow,
    /// Request is denied with the failure's HTTP status.
    Deny(AuthFailure),
}

/// Enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Failures deny the request.
    #[default]
    Enforce,
    /// Failures are logged and counted; the request passes through.
    LogOnly,
}

/// Auth service configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// `key id → secret` table.
    pub keys: BTreeMap<String, Vec<u8>>,
    /// Maximum `|now − timestamp|` in milliseconds (default 5 minutes).
    pub max_clock_skew_ms: i64,
    /// Nonce LRU capacity (default 100 000).
    pub nonce_capacity: usize,
    /// Enforce or log-only.
    pub mode: AuthMode,
    /// Optional writer allow-list checked against sync payloads.
    pub allowed_writers: Option<BTreeSet<String>>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            keys: BTreeMap::new(),
            max_clock_skew_ms: 5 * 60 * 1000,
            nonce_capacity: 100_000,
            mode: AuthMode::Enforce,
            allowed_writers: None,
        }
    }
}

/// Counter snapshot for metrics scraping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthCounters {
    /// Requests denied (or flagged) for nonce replay.
    pub replay_rejects: u64,
    /// Requests denied (or flagged) for clock skew.
    pub skew_rejects: u64,
    /// Requests denied (or flagged) for a bad signature.
    pub signature_rejects: u64,
    /// Requests denied (or flagged) for missing/malformed headers or an
    /// unknown key.
    pub format_rejects: u64,
    /// Failures allowed through in log-only mode.
    pub passthroughs: u64,
    /// Nonces evicted from the LRU.
    pub nonce_evictions: u64,
}

// Access-ordered nonce cache. Reservation is one check-then-insert step
// under the mutex that owns the whole structure.
#[derive(Debug, Default)]
struct NonceLru {
    by_nonce: HashMap<String, u64>,
    by_age: BTreeMap<u64, String>,
    tick: u64,
    evictions: u64,
}

impl NonceLru {
    // Returns true if the nonce was fresh and is now reserved.
    fn reserve(&mut self, nonce: &str, capacity: usize) -> bool {
        if let Some(age) = self.by_nonce.get(nonce).copied() {
            // Refresh recency so an attacker cannot age a nonce out by
            // flooding with fresh ones and then replaying it.
            self.by_age.remove(&age);
            self.tick += 1;
            self.by_age.insert(self.tick, nonce.to_owned());
            self.by_nonce.insert(nonce.to_owned(), self.tick);
            return false;
        }
        self.tick += 1;
        self.by_nonce.insert(nonce.to_owned(), self.tick);
        self.by_age.insert(self.tick, nonce.to_owned());
        while self.by_nonce.len() > capacity {
            if let Some((&oldest, _)) = self.by_age.iter().next() {
                if let Some(victim) = self.by_age.remove(&oldest) {
                    self.by_nonce.remove(&victim);
                    self.evictions += 1;
                }
            } else {
                break;
            }
        }
        true
    }
}

/// One request's auth-relevant pieces, transport-agnostic.
#[derive(Debug, Clone)]
pub struct RequestAuth<'a> {
    /// HTTP method, uppercase.
    pub method: &'a str,
    /// `pathname + search`.
    pub canonical_path: &'a str,
    /// `content-type` header value.
    pub content_type: &'a str,
    /// Raw request body.
    pub body: &'a [u8],
    /// Auth header lookup (lowercase names).
    pub headers: &'a BTreeMap<String, String>,
}

/// HMAC verification service with nonce replay protection.
pub struct AuthService {
    config: AuthConfig,
    crypto: Arc<dyn CryptoPort>,
    clock: Arc<dyn ClockPort>,
    nonces: Mutex<NonceLru>,
    replay_rejects: AtomicU64,
    skew_rejects: AtomicU64,
    signature_rejects: AtomicU64,
    format_rejects: AtomicU64,
    passthroughs: AtomicU64,
}

impl AuthService {
    /// Creates a service over the given key table and ports.
    pub fn new(config: AuthConfig, crypto: Arc<dyn CryptoPort>, clock: Arc<dyn ClockPort>) -> Self {
        Self {
            config,
            crypto,
            clock,
            nonces: Mutex::new(NonceLru::default()),
            replay_rejects: AtomicU64::new(0),
            skew_rejects: AtomicU64::new(0),
            signature_rejects: AtomicU64::new(0),
            format_rejects: AtomicU64::new(0),
            passthroughs: AtomicU64::new(0),
        }
    }

    /// The configured writer allow-list, if any.
    #[must_use]
    pub fn allowed_writers(&self) -> Option<&BTreeSet<String>> {
        self.config.allowed_writers.as_ref()
    }

    /// Current counter values.
    pub fn counters(&self) -> AuthCounters {
        let nonce_evictions = match self.nonces.lock() {
            Ok(guard) => guard.evictions,
            Err(poisoned) => poisoned.into_inner().evictions,
        };
        AuthCounters {
            replay_rejects: self.replay_rejects.load(Ordering::Relaxed),
            skew_rejects: self.skew_rejects.load(Ordering::Relaxed),
            signature_rejects: self.signature_rejects.load(Ordering::Relaxed),
            format_rejects: self.format_rejects.load(Ordering::Relaxed),
            passthroughs: self.passthroughs.load(Ordering::Relaxed),
            nonce_evictions,
        }
    }

    /// Verifies one request, applying the configured mode.
    pub fn verify(&self, request: &RequestAuth<'_>) -> AuthDecision {
        match self.check(request) {
            Ok(()) => AuthDecision::Allow,
            Err(failure) => self.apply_mode(failure),
        }
    }

    /// Checks a payload's writers against the allow-list.
    ///
    /// A no-op when no allow-list is configured.
    pub fn check_writers<'w, I>(&self, writers: I) -> AuthDecision
    where
        I: IntoIterator<Item = &'w str>,
    {
        let Some(allowed) = &self.config.allowed_writers else {
            return AuthDecision::Allow;
        };
        for writer in writers {
            if !allowed.contains(writer) {
                return self.apply_mode(AuthFailure::ForbiddenWriter(writer.to_owned()));
            }
        }
        AuthDecision::Allow
    }

    fn apply_mode(&self, failure: AuthFailure) -> AuthDecision {
        self.count(&failure);
        match self.config.mode {
            AuthMode::Enforce => AuthDecision::Deny(failure),
            AuthMode::LogOnly => {
                self.passthroughs.fetch_add(1, Ordering::Relaxed);
                warn!(failure = %failure, "auth failure allowed through (log-only)");
                AuthDecision::Allow
            }
        }
    }

    fn count(&self, failure: &AuthFailure) {
        let counter = match failure {
            AuthFailure::Replay => &self.replay_rejects,
            AuthFailure::SkewExceeded => &self.skew_rejects,
            AuthFailure::BadSignature => &self.signature_rejects,
            AuthFailure::MissingHeader(_)
            | AuthFailure::BadHeaderFormat(_)
            | AuthFailure::UnknownKey
            | AuthFailure::ForbiddenWriter(_) => &self.format_rejects,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // The ordered pipeline. Every failure short-circuits.
    fn check(&self, request: &RequestAuth<'_>) -> Result<(), AuthFailure> {
        // 1. Header presence and exact formats.
        let version = header(request, headers::SIG_VERSION)?;
        if version != SIG_VERSION {
            return Err(AuthFailure::BadHeaderFormat(headers::SIG_VERSION));
        }
        let key_id = header(request, headers::KEY_ID)?;
        let timestamp = header(request, headers::TIMESTAMP)?;
        if timestamp.is_empty()
            || timestamp.len() > 16
            || !timestamp.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(AuthFailure::BadHeaderFormat(headers::TIMESTAMP));
        }
        let nonce = header(request, headers::NONCE)?;
        if !is_uuid_v4(nonce) {
            return Err(AuthFailure::BadHeaderFormat(headers::NONCE));
        }
        let signature = header(request, headers::SIGNATURE)?;
        if signature.len() != 64
            || !signature
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(AuthFailure::BadHeaderFormat(headers::SIGNATURE));
        }

        // 2. Timestamp freshness, before any HMAC work.
        let ts: i64 = timestamp
            .parse()
            .map_err(|_| AuthFailure::BadHeaderFormat(headers::TIMESTAMP))?;
        let now = self.clock.now_epoch_ms();
        if (now - ts).abs() > self.config.max_clock_skew_ms {
            return Err(AuthFailure::SkewExceeded);
        }

        // 3. Key resolution.
        let secret = self
            .config
            .keys
            .get(key_id)
            .ok_or(AuthFailure::UnknownKey)?;

        // 4. Signature verification, constant time over hex-decoded tags.
        let body_hash = self.crypto.sha256_hex(request.body);
        let string = signing_string(
            key_id,
            request.method,
            request.canonical_path,
            timestamp,
            nonce,
            request.content_type,
            &body_hash,
        );
        let expected = self.crypto.hmac_sha256(secret, string.as_bytes());
        let Ok(provided) = hex::decode(signature) else {
            return Err(AuthFailure::BadHeaderFormat(headers::SIGNATURE));
        };
        if !self.crypto.timing_safe_eq(&expected, &provided) {
            return Err(AuthFailure::BadSignature);
        }

        // 5. Nonce reservation, only after the signature passed: failed
        // signatures must never consume nonce slots.
        let reserved = match self.nonces.lock() {
            Ok(mut guard) => guard.reserve(nonce, self.config.nonce_capacity),
            Err(poisoned) => poisoned
                .into_inner()
                .reserve(nonce, self.config.nonce_capacity),
        };
        if !reserved {
            return Err(AuthFailure::Replay);
        }
        Ok(())
    }
}

fn header<'a>(
    request: &'a RequestAuth<'_>,
    name: &'static str,
) -> Result<&'a str, AuthFailure> {
    request
        .headers
        .get(name)
        .map(String::as_str)
        .ok_or(AuthFailure::MissingHeader(name))
}

// UUID v4, lowercase hex: 8-4-4-4-12 with version nibble 4 and RFC 4122
// variant.
fn is_uuid_v4(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if b != b'-' {
                    return false;
                }
            }
            14 => {
                if b != b'4' {
                    return false;
                }
            }
            19 => {
                if !matches!(b, b'8' | b'9' | b'a' | b'b') {
                    return false;
                }
            }
            _ => {
                if !(b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use warp_store::{FixedClock, StdCrypto};

    const NONCE: &str = "7f9c2ba4-e88f-4a6a-8e07-c7889ca2d1a3";

    fn service(mode: AuthMode) -> AuthService {
        service_with(mode, 100_000)
    }

    fn service_with(mode: AuthMode, capacity: usize) -> AuthService {
        let mut keys = BTreeMap::new();
        keys.insert("key-1".to_owned(), b"topsecret".to_vec());
        AuthService::new(
            AuthConfig {
                keys,
                nonce_capacity: capacity,
                mode,
                ..AuthConfig::default()
            },
            Arc::new(StdCrypto::new()),
            Arc::new(FixedClock::at(1_700_000_000_000)),
        )
    }

    fn signed_headers(nonce: &str, ts: i64) -> BTreeMap<String, String> {
        sign_request(
            &StdCrypto::new(),
            "key-1",
            b"topsecret",
            "POST",
            "/sync",
            "application/json",
            b"{}",
            ts,
            nonce,
        )
    }

    fn request<'a>(headers: &'a BTreeMap<String, String>) -> RequestAuth<'a> {
        RequestAuth {
            method: "POST",
            canonical_path: "/sync",
            content_type: "application/json",
            body: b"{}",
            headers,
        }
    }

    #[test]
    fn signing_is_deterministic() {
        let a = signed_headers(NONCE, 1_700_000_000_000);
        let b = signed_headers(NONCE, 1_700_000_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn valid_request_allowed_then_replay_rejected() {
        let service = service(AuthMode::Enforce);
        let headers = signed_headers(NONCE, 1_700_000_000_000);
        assert_eq!(service.verify(&request(&headers)), AuthDecision::Allow);
        assert_eq!(
            service.verify(&request(&headers)),
            AuthDecision::Deny(AuthFailure::Replay)
        );
        let counters = service.counters();
        assert_eq!(counters.replay_rejects, 1);
    }

    // Counts HMAC invocations so the skew test can prove the gate runs
    // before any signature work.
    struct CountingCrypto {
        inner: StdCrypto,
        hmac_calls: std::sync::atomic::AtomicU64,
    }

    impl warp_store::CryptoPort for CountingCrypto {
        fn sha256_hex(&self, bytes: &[u8]) -> String {
            self.inner.sha256_hex(bytes)
        }

        fn hmac_sha256(&self, key: &[u8], bytes: &[u8]) -> Vec<u8> {
            self.hmac_calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.hmac_sha256(key, bytes)
        }

        fn timing_safe_eq(&self, a: &[u8], b: &[u8]) -> bool {
            self.inner.timing_safe_eq(a, b)
        }
    }

    #[test]
    fn skew_gate_rejects_before_signature_work() {
        let mut keys = BTreeMap::new();
        keys.insert("key-1".to_owned(), b"topsecret".to_vec());
        let crypto = Arc::new(CountingCrypto {
            inner: StdCrypto::new(),
            hmac_calls: std::sync::atomic::AtomicU64::new(0),
        });
        let crypto_port: Arc<dyn CryptoPort> = crypto.clone();
        let service = AuthService::new(
            AuthConfig {
                keys,
                ..AuthConfig::default()
            },
            crypto_port,
            Arc::new(FixedClock::at(1_700_000_000_000)),
        );
        // Ten minutes behind the fixed clock.
        let headers = signed_headers(NONCE, 1_700_000_000_000 - 10 * 60 * 1000);
        assert_eq!(
            service.verify(&request(&headers)),
            AuthDecision::Deny(AuthFailure::SkewExceeded)
        );
        assert_eq!(service.counters().skew_rejects, 1);
        // The gate fired before any HMAC was computed.
        assert_eq!(
            crypto.hmac_calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[test]
    fn bad_signature_does_not_consume_nonce() {
        let service = service(AuthMode::Enforce);
        let mut headers = signed_headers(NONCE, 1_700_000_000_000);
        headers.insert(headers::SIGNATURE.into(), "a".repeat(64));
        assert_eq!(
            service.verify(&request(&headers)),
            AuthDecision::Deny(AuthFailure::BadSignature)
        );
        // The nonce is still fresh: a correctly signed request with it passes.
        let good = signed_headers(NONCE, 1_700_000_000_000);
        assert_eq!(service.verify(&request(&good)), AuthDecision::Allow);
    }

    #[test]
    fn header_format_checks() {
        let service = service(AuthMode::Enforce);
        let good = signed_headers(NONCE, 1_700_000_000_000);

        let mut missing = good.clone();
        missing.remove(headers::NONCE);
        assert!(matches!(
            service.verify(&request(&missing)),
            AuthDecision::Deny(AuthFailure::MissingHeader(_))
        ));

        let mut bad_nonce = good.clone();
        bad_nonce.insert(headers::NONCE.into(), "not-a-uuid".into());
        assert!(matches!(
            service.verify(&request(&bad_nonce)),
            AuthDecision::Deny(AuthFailure::BadHeaderFormat(_))
        ));

        let mut bad_version = good.clone();
        bad_version.insert(headers::SIG_VERSION.into(), "2".into());
        assert!(matches!(
            service.verify(&request(&bad_version)),
            AuthDecision::Deny(AuthFailure::BadHeaderFormat(_))
        ));

        let mut long_ts = good;
        long_ts.insert(headers::TIMESTAMP.into(), "1".repeat(17));
        assert!(matches!(
            service.verify(&request(&long_ts)),
            AuthDecision::Deny(AuthFailure::BadHeaderFormat(_))
        ));
    }

    #[test]
    fn unknown_key_is_401() {
        let service = service(AuthMode::Enforce);
        let headers = sign_request(
            &StdCrypto::new(),
            "key-unknown",
            b"topsecret",
            "POST",
            "/sync",
            "application/json",
            b"{}",
            1_700_000_000_000,
            NONCE,
        );
        let decision = service.verify(&request(&headers));
        assert_eq!(decision, AuthDecision::Deny(AuthFailure::UnknownKey));
        assert_eq!(AuthFailure::UnknownKey.status(), 401);
        assert_eq!(AuthFailure::Replay.status(), 403);
        assert_eq!(AuthFailure::SkewExceeded.status(), 403);
    }

    #[test]
    fn log_only_mode_passes_and_counts() {
        let service = service(AuthMode::LogOnly);
        let headers = signed_headers(NONCE, 1_700_000_000_000);
        assert_eq!(service.verify(&request(&headers)), AuthDecision::Allow);
        // Replay: flagged but allowed.
        assert_eq!(service.verify(&request(&headers)), AuthDecision::Allow);
        let counters = service.counters();
        assert_eq!(counters.replay_rejects, 1);
        assert_eq!(counters.passthroughs, 1);
    }

    #[test]
    fn nonce_lru_evicts_and_counts() {
        let service = service_with(AuthMode::Enforce, 2);
        for i in 0..3 {
            let nonce = format!("7f9c2ba4-e88f-4a6a-8e07-c7889ca2d1a{i}");
            let headers = signed_headers(&nonce, 1_700_000_000_000);
            assert_eq!(service.verify(&request(&headers)), AuthDecision::Allow);
        }
        assert_eq!(service.counters().nonce_evictions, 1);
    }

    #[test]
    fn allow_list_checks_writers() {
        let mut keys = BTreeMap::new();
        keys.insert("key-1".to_owned(), b"topsecret".to_vec());
        let service = AuthService::new(
            AuthConfig {
                keys,
                allowed_writers: Some(["alice".to_owned()].into_iter().collect()),
                ..AuthConfig::default()
            },
            Arc::new(StdCrypto::new()),
            Arc::new(FixedClock::at(0)),
        );
        assert_eq!(service.check_writers(["alice"]), AuthDecision::Allow);
        assert!(matches!(
            service.check_writers(["alice", "mallory"]),
            AuthDecision::Deny(AuthFailure::ForbiddenWriter(_))
        ));

        // Without an allow-list the check is a no-op.
        let open = service_with(AuthMode::Enforce, 10);
        assert_eq!(open.check_writers(["anyone"]), AuthDecision::Allow);
    }

    #[test]
    fn uuid_v4_validation() {
        assert!(is_uuid_v4(NONCE));
        assert!(!is_uuid_v4("7f9c2ba4-e88f-1a6a-8e07-c7889ca2d1a3")); // v1
        assert!(!is_uuid_v4("7f9c2ba4-e88f-4a6a-ce07-c7889ca2d1a3")); // variant
        assert!(!is_uuid_v4("7F9C2BA4-E88F-4A6A-8E07-C7889CA2D1A3")); // case
        assert!(!is_uuid_v4("short"));
    }
}
