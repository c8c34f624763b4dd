#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

/// Current Unix time in milliseconds.
#[inline]
pub fn unix_ms_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::from_secs(0))
		.as_millis() as i64
}

/// Current Unix time in whole seconds.
#[inline]
pub fn unix_secs_now() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// RFC 3339 UTC timestamp with millisecond precision (`2026-01-01T00:00:00.000Z`).
pub fn rfc3339_from_ms(ms: i64) -> String {
	DateTime::<Utc>::from_timestamp_millis(ms)
		.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
		.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn rfc3339_now() -> String {
	rfc3339_from_ms(unix_ms_now())
}
