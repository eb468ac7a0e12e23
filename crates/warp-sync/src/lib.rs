// SPDX-License-Identifier: Apache-2.0
//! warp-sync: HMAC-authenticated HTTP peer synchronization.
//!
//! Three layers over the `warp-graph` sync protocol:
//!
//! - [`auth`] — canonical signing strings, HMAC verification with a nonce
//!   replay cache, skew gating, enforce/log-only modes, writer allow-lists.
//! - [`server`] — a thin axum composer: route, validate, authorize,
//!   dispatch, canonicalize.
//! - [`client`] — a retrying reqwest client with per-attempt timeouts,
//!   exponential backoff with decorrelated jitter, and cancellation.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

pub mod auth;
pub mod client;
pub mod server;

pub use auth::{
    sign_request, sign_request_now, signing_string, AuthConfig, AuthCounters, AuthDecision,
    AuthFailure, AuthMode, AuthService, RequestAuth,
};
pub use client::{ClientAuth, SyncClient, SyncClientConfig, SyncError};
pub use server::{
    sync_router, SyncServerConfig, DEFAULT_MAX_BODY_BYTES, DEFAULT_SYNC_PATH, MAX_BODY_BYTES_CAP,
};
