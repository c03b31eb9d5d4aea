//! Wall-clock offsets from configured durations. Offsets too large for
//! `DateTime` saturate at its bounds instead of panicking.

use chrono::{DateTime, Utc};
use std::time::Duration;

pub fn now_plus(by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| Utc::now().checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn now_minus(by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| Utc::now().checked_sub_signed(by))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
