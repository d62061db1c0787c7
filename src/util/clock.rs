//! Wall-clock helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Absolute timestamp `delay` after `from_ms`.
pub fn after_ms(from_ms: u128, delay: Duration) -> u128 {
    from_ms.saturating_add(delay.as_millis())
}
