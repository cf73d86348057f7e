//! Platform-wide access rate limiting.
//!
//! Each platform key gets its own bucket tracking the unix time of its
//! last permitted call and the minimum interval between calls. `wait`
//! computes the remaining delay under the lock, then sleeps *outside*
//! it: the mutex is never held across an `.await` that can take longer
//! than a few microseconds, so a slow room never stalls every other
//! room sharing the same platform.

use std::collections::HashMap;
use std::time::Duration;

use base::clock::{Clocks, RealClocks};
use base::shutdown;
use parking_lot::Mutex;

#[derive(Clone, Copy, Debug)]
struct Bucket {
    min_interval: Duration,
    last_call_unix: Option<i64>,
}

/// Shared across every room scheduler on the same platform.
pub struct RateLimiter {
    clocks: Box<dyn Clocks>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            clocks: Box::new(RealClocks),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_clocks(clocks: Box<dyn Clocks>) -> Self {
        RateLimiter {
            clocks,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Installs or updates the minimum interval for `platform`. Called
    /// whenever the config snapshot changes; does not reset the
    /// bucket's `last_call_unix`, so a config edit can only ever
    /// shorten or lengthen the *next* wait, never erase the fact a call
    /// already happened this tick.
    pub fn set(&self, platform: &str, min_interval: Duration) {
        self.buckets
            .lock()
            .entry(platform.to_string())
            .or_insert(Bucket {
                min_interval,
                last_call_unix: None,
            })
            .min_interval = min_interval;
    }

    pub fn remove(&self, platform: &str) {
        self.buckets.lock().remove(platform);
    }

    /// The remaining wait, if any, before `platform` may be called
    /// again. `None` means the platform is unthrottled or free to call
    /// now.
    pub fn info(&self, platform: &str) -> Option<Duration> {
        let buckets = self.buckets.lock();
        let bucket = buckets.get(platform)?;
        let last = bucket.last_call_unix?;
        let now = self.clocks.now_unix();
        let elapsed = Duration::from_secs((now - last).max(0) as u64);
        bucket.min_interval.checked_sub(elapsed)
    }

    /// Immediately marks `platform` as called right now, without
    /// waiting. Used by the scheduler's manual "force refresh" path,
    /// which bypasses rate limiting for one call but still counts
    /// against future ones.
    pub fn force(&self, platform: &str) {
        let now = self.clocks.now_unix();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(platform.to_string()).or_insert(Bucket {
            min_interval: Duration::ZERO,
            last_call_unix: None,
        });
        bucket.last_call_unix = Some(now);
    }

    /// Waits until `platform` may be called, then records the call.
    /// Returns early if `shutdown` fires first.
    pub async fn wait(&self, platform: &str, shutdown: &shutdown::Receiver) {
        loop {
            let remaining = self.info(platform);
            match remaining {
                Some(d) if !d.is_zero() => {
                    tokio::select! {
                        _ = tokio::time::sleep(d) => {}
                        _ = shutdown.cancelled() => return,
                    }
                    continue;
                }
                _ => break,
            }
        }
        self.force(platform);
    }

    /// Re-reads every known platform's interval from `intervals` (e.g.
    /// derived from the live config snapshot), dropping buckets for
    /// platforms no longer present so a removed platform override
    /// doesn't linger forever.
    pub fn reconcile(&self, intervals: &HashMap<String, Duration>) {
        let mut buckets = self.buckets.lock();
        buckets.retain(|k, _| intervals.contains_key(k));
        for (platform, interval) in intervals {
            buckets
                .entry(platform.clone())
                .or_insert(Bucket {
                    min_interval: *interval,
                    last_call_unix: None,
                })
                .min_interval = *interval;
        }
    }
}
