//! Wire timestamp helpers

use chrono::Utc;

/// Current UTC time as unix milliseconds, the wire `serverTime` unit
pub fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}
