// Wall clock helpers.
//
// Entries and QoS records carry absolute epoch milliseconds; timers inside the
// runtime work on monotonic instants. These helpers bridge the two.

use std::time::Duration;

/// Current wall clock time in milliseconds since the unix epoch.
pub fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Duration from now until the epoch timestamp `epoch_ms`, zero if it already passed.
pub fn duration_until_epoch_ms(epoch_ms: i64) -> Duration {
    let remaining = epoch_ms.saturating_sub(current_time_ms());
    Duration::from_millis(remaining.max(0) as u64)
}

/// Monotonic instant corresponding to the epoch timestamp `epoch_ms`.
///
/// The conversion happens once, so later wall clock adjustments do not move
/// the deadline.
pub fn instant_after_epoch_ms(epoch_ms: i64) -> tokio::time::Instant {
    tokio::time::Instant::now() + duration_until_epoch_ms(epoch_ms)
}
