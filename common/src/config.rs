//! Named constants shared by both services. Each constant here is referenced from
//! exactly the spec.md section that defines it, so a reviewer can find the source
//! of truth without grepping for a magic number.

/// §4.1 "infrastructure fee (inclusive), default 15%". DESIGN.md's Open Question #1
/// picks the top of the documented 5-15% range and keeps it this one named constant.
pub const DEFAULT_INFRA_FEE_BPS: u32 = 1500;

/// §4.3 "Finalize tolerance default 5%".
pub const GASLESS_FINALIZE_TOLERANCE_BPS: u32 = 500;

/// §4.1 "stablecoin_for_credits ... +10% volatility buffer".
pub const STABLECOIN_VOLATILITY_BUFFER_BPS: u32 = 1000;

/// §4.1 "floor 1000 atomic units".
pub const STABLECOIN_MIN_ATOMIC_UNITS: u128 = 1000;

/// §4.4 "Bodies that exceed the configured maximum (10 GiB) are rejected".
pub const MAX_ITEM_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// §4.4 "Verification is streamable for items >= 10 KiB".
pub const STREAMING_VERIFY_THRESHOLD_BYTES: u64 = 10 * 1024;

/// §6 "GET /info ... free-upload limit (default 517 120 bytes for ecosystem-recognized items)".
pub const DEFAULT_FREE_UPLOAD_LIMIT_BYTES: u64 = 517_120;

/// §4.5 multipart chunk size bounds and default.
pub const MULTIPART_MIN_CHUNK_BYTES: u64 = 5 * 1024 * 1024;
pub const MULTIPART_MAX_CHUNK_BYTES: u64 = 500 * 1024 * 1024;
pub const MULTIPART_DEFAULT_CHUNK_BYTES: u64 = 25 * 1024 * 1024;
pub const MULTIPART_MAX_CHUNKS: u32 = 10_000;
pub const MULTIPART_MAX_TOTAL_BYTES: u64 = MAX_ITEM_SIZE_BYTES;

/// §4.8 planner grouping: "maximum plan size 2 GiB, maximum 10 000 items per plan".
pub const PLAN_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;
pub const PLAN_MAX_ITEMS: usize = 10_000;

/// §4.8 preparer: "Fetch planned items' envelope headers from cold store (<= 100 concurrent)".
pub const PREPARER_FETCH_CONCURRENCY: usize = 100;
/// §4.8 preparer: "emit the offsets batched (<= 250 per emit)".
pub const PREPARER_OFFSET_BATCH_SIZE: usize = 250;
/// §4.8 new-data-item: "Batched insert (up to 500)".
pub const NEW_DATA_ITEM_BATCH_SIZE: usize = 500;

/// §4.8 verifier thresholds. Asserted at config load: drop strictly precedes overdue
/// (DESIGN.md Open Question #3).
pub const BUNDLE_VERIFY_CONFIRMATIONS: u64 = 18;
pub const BUNDLE_DROP_BLOCKS: u64 = 50;
/// §3 "deadline height" eligibility: "deadline height minus current chain height <= 200 blocks".
pub const BUNDLE_OVERDUE_BLOCKS: u64 = 200;

const _: () = assert!(
    BUNDLE_DROP_BLOCKS < BUNDLE_OVERDUE_BLOCKS,
    "a dropped bundle must be detected strictly before its items would be considered overdue"
);

/// §4.7 per-stage concurrency caps (per node).
pub mod queue_concurrency {
    pub const PLANNER: usize = 1;
    pub const PREPARER: usize = 3;
    pub const POSTER: usize = 2;
    pub const SEEDER: usize = 2;
    pub const VERIFIER: usize = 3;
    pub const PUT_OFFSETS: usize = 5;
    pub const NEW_DATA_ITEM: usize = 5;
    pub const OPTICAL_POST: usize = 5;
    pub const UNBUNDLE_NESTED: usize = 2;
    pub const FINALIZE_MULTIPART: usize = 3;
    pub const CLEANUP_WARM: usize = 1;
}

/// §4.7 retry: "exponential backoff, 3 attempts (~5s / 25s / 125s), then move to failed".
pub const QUEUE_RETRY_DELAYS_SECONDS: [u64; 3] = [5, 25, 125];
pub const QUEUE_MAX_ATTEMPTS: u32 = 3;

/// §4.7 retention.
pub const QUEUE_COMPLETED_RETENTION: usize = 1_000;
pub const QUEUE_FAILED_RETENTION: usize = 5_000;
pub const QUEUE_FAILED_RETENTION_DAYS: i64 = 7;

/// §5 "Graceful shutdown. Workers drain current jobs up to 30s; in-flight HTTP finishes
/// up to 10s".
pub const SHUTDOWN_WORKER_DRAIN_SECONDS: u64 = 30;
pub const SHUTDOWN_HTTP_DRAIN_SECONDS: u64 = 10;

/// §5 "Cancellation & timeouts": outbound call deadlines.
pub const DEFAULT_HTTP_DEADLINE_SECONDS: u64 = 60;
pub const STABLECOIN_SETTLEMENT_DEADLINE_SECONDS: u64 = 10;
pub const SEED_STAGE_DEADLINE_SECONDS: u64 = 300;

/// §4.6 "Hot quarantine namespace captures verification-rejected content for 24h".
pub const QUARANTINE_TTL_SECONDS: i64 = 24 * 3_600;
/// §4.8 cleanup-warm: "Scan permanent items older than 24h". Shares the same wall
/// clock as the quarantine TTL above (DESIGN.md Open Question #4).
pub const WARM_SWEEP_AFTER_PERMANENT_SECONDS: i64 = 24 * 3_600;
/// §4.8 cleanup-warm: batch size, in-batch concurrency, heartbeat interval and
/// consecutive-error abort threshold for a single sweep pass.
pub const CLEANUP_WARM_BATCH_SIZE: usize = 500;
pub const CLEANUP_WARM_CONCURRENCY: usize = 8;
pub const CLEANUP_WARM_HEARTBEAT_SECONDS: u64 = 15;
pub const CLEANUP_WARM_MAX_CONSECUTIVE_ERRORS: u32 = 10;
/// §4.8 cleanup-warm: how often a sweep cycle is scheduled.
pub const CLEANUP_WARM_SCHEDULE_INTERVAL_SECONDS: u64 = 24 * 3_600;

/// §4.9 offset index TTL ("implicit via partition drop ~365 days").
pub const OFFSET_INDEX_RETENTION_DAYS: i64 = 365;

/// §4.4 oracle cache TTL ("<= 60s").
pub const ORACLE_CACHE_TTL_SECONDS: u64 = 60;

/// §4.8 optical-post circuit breaker.
pub mod circuit_breaker {
    pub const TIMEOUT_SECONDS: u64 = 10;
    pub const ERROR_RATE_THRESHOLD_BPS: u32 = 5_000;
    pub const MIN_REQUESTS_TO_TRIP: u32 = 5;
    pub const HALF_OPEN_AFTER_SECONDS: u64 = 30;
}

/// §4.7 "Every job handler is required to be idempotent keyed by its input."
/// Default gasless-payment mode per endpoint (DESIGN.md Open Question #2): the
/// one-shot endpoint defaults to `hybrid`, raw-blob to `exact-only`, both overridable.
pub const DEFAULT_GASLESS_MODE_ONE_SHOT: &str = "hybrid";
pub const DEFAULT_GASLESS_MODE_RAW: &str = "exact-only";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_defaults_are_within_bounds() {
        assert!(MULTIPART_DEFAULT_CHUNK_BYTES >= MULTIPART_MIN_CHUNK_BYTES);
        assert!(MULTIPART_DEFAULT_CHUNK_BYTES <= MULTIPART_MAX_CHUNK_BYTES);
    }
}
