// SPDX-License-Identifier: Apache-2.0
//! Clock port: epoch-millisecond and RFC 3339 timestamps.

use chrono::{DateTime, SecondsFormat, Utc};

/// Wall-clock source consumed by the auth skew gate and BTR creation.
///
/// Abstracting the clock keeps skew and replay logic testable: tests pin a
/// [`FixedClock`] and step it explicitly.
pub trait ClockPort: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_epoch_ms(&self) -> i64;

    /// Current instant as an RFC 3339 / ISO-8601 UTC string (second
    /// precision, `Z` suffix).
    fn now_iso8601(&self) -> String {
        let Some(dt) = DateTime::<Utc>::from_timestamp_millis(self.now_epoch_ms()) else {
            // Out-of-range epoch millis cannot come from a real clock.
            return String::from("1970-01-01T00:00:00Z");
        };
        dt.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates the system clock port.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ClockPort for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Deterministic clock for tests: starts at a fixed instant, advances only
/// when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: std::sync::atomic::AtomicI64,
}

impl FixedClock {
    /// Creates a clock pinned at `epoch_ms`.
    #[must_use]
    pub fn at(epoch_ms: i64) -> Self {
        Self {
            now_ms: std::sync::atomic::AtomicI64::new(epoch_ms),
        }
    }

    /// Advances the clock by `delta_ms` (may be negative).
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms
            .fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }

    /// Pins the clock at `epoch_ms`.
    pub fn set(&self, epoch_ms: i64) {
        self.now_ms
            .store(epoch_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl ClockPort for FixedClock {
    fn now_epoch_ms(&self) -> i64 {
        self.now_ms.load(std::sync::atomic::Ordering::SeqCst)
    }
}
