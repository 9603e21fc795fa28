//! Wall-clock helpers shared by both services.
//!
//! Both the 24h quarantine TTL (§4.6) and the 24h warm-store-sweep-after-permanent
//! rule (§4.8 `cleanup-warm`) read through this module so the two windows share
//! one clock and cannot silently drift apart under clock skew (DESIGN.md #4).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Millisecond timestamp.
pub type TimestampMillis = u64;
/// Second timestamp.
pub type TimestampSeconds = u64;

#[inline]
pub fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
}

pub fn now_seconds() -> TimestampSeconds {
    now().as_secs()
}

pub fn now_millis() -> TimestampMillis {
    now().as_millis() as TimestampMillis
}

/// `chrono::DateTime<Utc>` for the current instant, for storage layers that want it directly.
pub fn now_utc() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
