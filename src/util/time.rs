//! Time utilities for match bookkeeping

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Whole seconds between two millisecond timestamps, zero if `end` precedes `start`
pub fn whole_secs_between(start_millis: u64, end_millis: u64) -> u32 {
    (end_millis.saturating_sub(start_millis) / 1000) as u32
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_between_rounds_down() {
        assert_eq!(whole_secs_between(1_000, 3_999), 2);
        assert_eq!(whole_secs_between(5_000, 1_000), 0);
    }
}
