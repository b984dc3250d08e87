//! Timestamp helpers shared by the codec and latency bookkeeping.
//!
//! Wire timestamps are signed unix-millisecond counts so pre-epoch values
//! survive a round trip instead of being clamped.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time as unix milliseconds.
pub fn unix_millis_now() -> i64 {
    to_unix_millis(SystemTime::now())
}

/// Convert a timestamp to unix milliseconds.
pub fn to_unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_millis() as i64,
        Err(err) => -(err.duration().as_millis() as i64),
    }
}

/// Convert unix milliseconds back to a timestamp.
pub fn from_unix_millis(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_at_millisecond_precision() {
        let now = SystemTime::now();
        let decoded = from_unix_millis(to_unix_millis(now));
        let delta = now
            .duration_since(decoded)
            .unwrap_or_else(|e| e.duration());
        assert!(delta < Duration::from_millis(1));
    }

    #[test]
    fn pre_epoch_values_survive() {
        let before = UNIX_EPOCH - Duration::from_millis(12_345);
        assert_eq!(from_unix_millis(to_unix_millis(before)), before);
    }
}
