//! Clock abstraction for testability.
//!
//! Scheduling itself (sleeps, timeouts) uses `tokio::time`, which already
//! supports a paused/advanceable virtual clock under `#[tokio::test]`.
//! This module covers the other half: wall-clock timestamps that get
//! stamped onto `RoomInfo`/`Config` and compared across components, which
//! need to be injectable the same way for deterministic tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// Abstract interface to the wall clock.
pub trait Clocks: Send + Sync + 'static {
    /// Seconds since the Unix epoch.
    fn now_unix(&self) -> i64;
}

#[derive(Copy, Clone, Default)]
pub struct RealClocks;

impl Clocks for RealClocks {
    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs() as i64
    }
}

/// Returns a jitter of up to `±bound` applied to `base`, never going negative.
///
/// Used by the per-room scheduler (`core::room::scheduler`) to de-synchronize
/// a fleet of rooms that would otherwise all wake at the same instant.
pub fn jitter(base: std::time::Duration, bound: std::time::Duration) -> std::time::Duration {
    if bound.is_zero() {
        return base;
    }
    let bound_ms = bound.as_millis().max(1) as i64;
    let offset_ms = rand::random::<i64>().rem_euclid(2 * bound_ms) - bound_ms;
    let total_ms = (base.as_millis() as i64 + offset_ms).max(0);
    std::time::Duration::from_millis(total_ms as u64)
}
