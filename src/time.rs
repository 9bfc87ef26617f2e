//! Time utilities.
//!
//! All timestamps in the crate are Unix seconds. Key expiry and time-bucketed
//! derivation both go through these helpers so tests can reason about a
//! single clock source.

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Seconds in one non-leap year, used for default role-key expiry.
pub const ONE_YEAR_SECS: i64 = 365 * 24 * 60 * 60;
