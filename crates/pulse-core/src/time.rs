use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

fn process_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// A wall-clock timestamp paired with a steady-clock reading taken at the same
/// moment. Durations are always computed from `nano_time`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Nanoseconds on the process-local monotonic clock.
    pub nano_time: i64,
}

impl Time {
    pub fn now() -> Self {
        let nano_time = i64::try_from(process_anchor().elapsed().as_nanos()).unwrap_or(i64::MAX);
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
            nano_time,
        }
    }

    pub fn from_parts(timestamp_ms: i64, nano_time: i64) -> Self {
        Self {
            timestamp_ms,
            nano_time,
        }
    }

    /// A time `delta` after this one on both clocks.
    pub fn plus(&self, delta: Duration) -> Self {
        let nanos = i64::try_from(delta.as_nanos()).unwrap_or(i64::MAX);
        let millis = i64::try_from(delta.as_millis()).unwrap_or(i64::MAX);
        Self {
            timestamp_ms: self.timestamp_ms.saturating_add(millis),
            nano_time: self.nano_time.saturating_add(nanos),
        }
    }

    /// Nanoseconds elapsed from `earlier` to `self`. Negative if out of order.
    pub fn nanos_since(&self, earlier: &Time) -> i64 {
        self.nano_time.saturating_sub(earlier.nano_time)
    }
}

/// Nanoseconds between two steady-clock readings, clamped to at least one.
pub fn duration_at_least_one(start_ns: i64, end_ns: i64) -> i64 {
    end_ns.saturating_sub(start_ns).max(1)
}

/// Nanoseconds elapsed since the process-local monotonic anchor was taken,
/// which approximates the process start.
pub fn process_uptime_ns() -> i64 {
    Time::now().nano_time
}

pub fn duration_to_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// Source of the correction between device and server clocks.
pub trait TimeProvider: Send + Sync {
    fn server_offset_ms(&self) -> i64;

    fn device_timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn server_timestamp_ms(&self) -> i64 {
        self.device_timestamp_ms() + self.server_offset_ms()
    }
}

/// Keeps the latest observed offset between device time and the intake's clock.
#[derive(Debug, Default)]
pub struct SyncedTimeProvider {
    offset_ms: AtomicI64,
}

impl SyncedTimeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a server `Date` observation taken when the device clock read `device_ms`.
    pub fn observe_server_time(&self, server: DateTime<Utc>, device_ms: i64) {
        let offset = server.timestamp_millis() - device_ms;
        self.offset_ms.store(offset, Ordering::Relaxed);
    }
}

impl TimeProvider for SyncedTimeProvider {
    fn server_offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }
}

/// A provider with a constant offset.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedTimeProvider(pub i64);

impl TimeProvider for FixedTimeProvider {
    fn server_offset_ms(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plus_advances_both_clocks() {
        let t = Time::from_parts(1_000, 5_000_000);
        let later = t.plus(Duration::from_millis(250));
        assert_eq!(later.timestamp_ms, 1_250);
        assert_eq!(later.nano_time, 255_000_000);
        assert_eq!(later.nanos_since(&t), 250_000_000);
    }

    #[test]
    fn duration_never_below_one() {
        assert_eq!(duration_at_least_one(10, 10), 1);
        assert_eq!(duration_at_least_one(10, 5), 1);
        assert_eq!(duration_at_least_one(10, 30), 20);
    }

    #[test]
    fn now_is_monotonic() {
        let a = Time::now();
        let b = Time::now();
        assert!(b.nano_time >= a.nano_time);
    }

    #[test]
    fn synced_provider_tracks_offset() {
        let provider = SyncedTimeProvider::new();
        assert_eq!(provider.server_offset_ms(), 0);
        let server = DateTime::from_timestamp_millis(10_000).unwrap();
        provider.observe_server_time(server, 7_500);
        assert_eq!(provider.server_offset_ms(), 2_500);
    }

    #[test]
    fn fixed_provider_offset() {
        assert_eq!(FixedTimeProvider(-42).server_offset_ms(), -42);
    }
}
