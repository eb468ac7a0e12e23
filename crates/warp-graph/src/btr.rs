// SPDX-License-Identifier: Apache-2.0
//! Boundary Transition Records: HMAC-authenticated graph segments.
//!
//! A BTR binds an initial state (`U0`), a replayable payload (`P`), and the
//! input/output state hashes under an HMAC-SHA-256 tag (`kappa`), making a
//! graph segment tamper-evident in transit. Verification re-computes the tag
//! over the same canonical fields with a constant-time comparison, and can
//! optionally replay `P` from `U0` to re-derive `hOut`.

use ciborium::value::Value;
use thiserror::Error;
use warp_store::{ClockPort, CryptoPort};

use crate::canonical::{self, map, CodecError};
use crate::payload::ProvenancePayload;
use crate::state::WarpState;
use crate::wire;

/// Supported BTR format version.
pub const BTR_VERSION: u64 = 1;

/// Errors raised while creating a BTR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BtrError {
    /// The HMAC key must be non-empty.
    #[error("BTR key must not be empty")]
    EmptyKey,
    /// Canonical codec failure while encoding the record body.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Why verification failed.
///
/// The display strings are the stable failure taxonomy callers match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyReason {
    /// A required field is absent or of the wrong shape.
    MissingField,
    /// The record's version is not supported.
    UnsupportedVersion,
    /// The HMAC tag does not match the canonical fields.
    TagMismatch,
    /// Replaying `P` from `U0` did not reproduce `hOut`.
    ReplayMismatch,
    /// `kappa` is not valid hex.
    InvalidHex,
}

impl std::fmt::Display for VerifyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingField => "Missing required field",
            Self::UnsupportedVersion => "Unsupported version",
            Self::TagMismatch => "Authentication tag mismatch",
            Self::ReplayMismatch => "Replay mismatch",
            Self::InvalidHex => "Invalid hex",
        };
        f.write_str(s)
    }
}

/// Verification result: valid, or a single enumerated reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// `true` iff every check passed.
    pub valid: bool,
    /// Present iff `valid` is false.
    pub reason: Option<VerifyReason>,
}

impl VerifyOutcome {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn fail(reason: VerifyReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// An authenticated boundary record.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryTransitionRecord {
    /// Format version (always 1).
    pub version: u64,
    /// State hash of `U0`.
    pub h_in: String,
    /// State hash after replaying `P` from `U0`.
    pub h_out: String,
    /// Full-state serialization of the initial state.
    pub u0: Vec<u8>,
    /// Replayable patch sequence.
    pub payload: ProvenancePayload,
    /// Creation timestamp (ISO 8601).
    pub t: String,
    /// Hex HMAC-SHA-256 over the canonical body.
    pub kappa: String,
}

// Canonical body the tag commits to: everything except kappa itself.
fn body_value(
    version: u64,
    h_in: &str,
    h_out: &str,
    u0: &[u8],
    payload: &ProvenancePayload,
    t: &str,
) -> Value {
    map(vec![
        ("P", payload.to_value()),
        ("U0", Value::Bytes(u0.to_vec())),
        ("hIn", Value::Text(h_in.to_owned())),
        ("hOut", Value::Text(h_out.to_owned())),
        ("t", Value::Text(t.to_owned())),
        ("version", Value::Integer(version.into())),
    ])
}

/// Creates a BTR over `u0` and `payload`, keyed by `key`.
///
/// `hIn` is the state hash of `u0`; `hOut` is the state hash after replaying
/// the payload from `u0`; `t` comes from the clock port.
///
/// # Errors
///
/// Returns [`BtrError::EmptyKey`] for an empty key and [`BtrError::Codec`]
/// if a property value in the states or payload is not encodable.
pub fn create_btr(
    u0: &WarpState,
    payload: &ProvenancePayload,
    key: &[u8],
    crypto: &dyn CryptoPort,
    clock: &dyn ClockPort,
) -> Result<BoundaryTransitionRecord, BtrError> {
    if key.is_empty() {
        return Err(BtrError::EmptyKey);
    }
    let h_in = u0.compute_state_hash_v5()?;
    let final_state = payload.replay(u0.clone()).state;
    let h_out = final_state.compute_state_hash_v5()?;
    let u0_bytes = u0.encode_full()?;
    let t = clock.now_iso8601();
    let body = body_value(BTR_VERSION, &h_in, &h_out, &u0_bytes, payload, &t);
    let tag = crypto.hmac_sha256(key, &canonical::encode_value(&body)?);
    Ok(BoundaryTransitionRecord {
        version: BTR_VERSION,
        h_in,
        h_out,
        u0: u0_bytes,
        payload: payload.clone(),
        t,
        kappa: hex::encode(tag),
    })
}

impl BoundaryTransitionRecord {
    /// Maps the record (including `kappa`) to its canonical wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        map(vec![
            ("P", self.payload.to_value()),
            ("U0", Value::Bytes(self.u0.clone())),
            ("hIn", Value::Text(self.h_in.clone())),
            ("hOut", Value::Text(self.h_out.clone())),
            ("kappa", Value::Text(self.kappa.clone())),
            ("t", Value::Text(self.t.clone())),
            ("version", Value::Integer(self.version.into())),
        ])
    }

    /// Encodes the record to canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if a property value is not encodable.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        canonical::encode_value(&self.to_value())
    }
}

/// Verifies an untrusted BTR value.
///
/// Pipeline, short-circuiting on the first failure: shape (required fields),
/// version, `kappa` hex decode, constant-time tag comparison, and — only
/// when `replay` is requested — re-derivation of `hOut` from `U0` and `P`.
#[must_use]
pub fn verify_btr(
    value: &Value,
    key: &[u8],
    crypto: &dyn CryptoPort,
    replay: bool,
) -> VerifyOutcome {
    // Shape checks.
    let Ok(version) = wire::get_u64(value, "version") else {
        return VerifyOutcome::fail(VerifyReason::MissingField);
    };
    let (Ok(h_in), Ok(h_out), Ok(t), Ok(kappa)) = (
        wire::get_text(value, "hIn"),
        wire::get_text(value, "hOut"),
        wire::get_text(value, "t"),
        wire::get_text(value, "kappa"),
    ) else {
        return VerifyOutcome::fail(VerifyReason::MissingField);
    };
    let Ok(u0_bytes) = wire::get_bytes(value, "U0") else {
        return VerifyOutcome::fail(VerifyReason::MissingField);
    };
    let Ok(payload_value) = wire::get(value, "P") else {
        return VerifyOutcome::fail(VerifyReason::MissingField);
    };

    if version != BTR_VERSION {
        return VerifyOutcome::fail(VerifyReason::UnsupportedVersion);
    }

    let Ok(provided_tag) = hex::decode(kappa) else {
        return VerifyOutcome::fail(VerifyReason::InvalidHex);
    };

    // Re-compute the tag over the canonical body. P is re-encoded from the
    // provided value verbatim, so a tampered payload changes the tag input.
    let body = map(vec![
        ("P", payload_value.clone()),
        ("U0", Value::Bytes(u0_bytes.to_vec())),
        ("hIn", Value::Text(h_in.to_owned())),
        ("hOut", Value::Text(h_out.to_owned())),
        ("t", Value::Text(t.to_owned())),
        ("version", Value::Integer(version.into())),
    ]);
    let Ok(body_bytes) = canonical::encode_value(&body) else {
        return VerifyOutcome::fail(VerifyReason::MissingField);
    };
    let expected_tag = crypto.hmac_sha256(key, &body_bytes);
    if !crypto.timing_safe_eq(&expected_tag, &provided_tag) {
        return VerifyOutcome::fail(VerifyReason::TagMismatch);
    }

    if replay {
        let (Ok(u0), Ok(payload)) = (
            WarpState::decode_full(u0_bytes),
            ProvenancePayload::from_value(payload_value),
        ) else {
            return VerifyOutcome::fail(VerifyReason::ReplayMismatch);
        };
        let replayed = payload.replay(u0).state;
        match replayed.compute_state_hash_v5() {
            Ok(derived) if derived == h_out => {}
            _ => return VerifyOutcome::fail(VerifyReason::ReplayMismatch),
        }
    }

    VerifyOutcome::ok()
}
