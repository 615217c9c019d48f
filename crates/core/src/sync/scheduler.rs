//! Scheduler constants and helpers for the sync engine.

/// Auto-sync pass cadence in seconds.
pub const SYNC_AUTO_INTERVAL_SECS: u64 = 45;

/// Maximum jitter (seconds) added to periodic pass intervals.
pub const SYNC_INTERVAL_JITTER_SECS: u64 = 5;

/// Cadence of the pending-count poll feeding the status observer.
pub const STATUS_POLL_INTERVAL_SECS: u64 = 5;

/// Pending records drained per pass.
pub const SYNC_BATCH_LIMIT: i64 = 500;

/// Milliseconds until an RFC3339 instant, or `Some(0)` if it has passed.
/// `None` when the input does not parse.
pub fn millis_until_rfc3339(target: &str) -> Option<u64> {
    let target = chrono::DateTime::parse_from_rfc3339(target).ok()?;
    let now = chrono::Utc::now();
    let diff = target.with_timezone(&chrono::Utc) - now;
    if diff <= chrono::Duration::zero() {
        return Some(0);
    }
    Some(diff.num_milliseconds() as u64)
}
