#![forbid(unsafe_code)]

use std::time::Duration;

use natter_domain::UserId;
use thiserror::Error;
use tokio::time::Instant;

/// Returned when an inbound event exceeds the per-connection window.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("event rate limit exceeded; retry in {retry_after:?}")]
pub struct RateLimited {
	pub retry_after: Duration,
}

/// Fixed-window policy: `capacity` events per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
	pub capacity: u32,
	pub window: Duration,
}

impl Default for RateLimitPolicy {
	fn default() -> Self {
		Self {
			capacity: 10,
			window: Duration::from_secs(60),
		}
	}
}

#[derive(Debug, Clone, Copy)]
struct Window {
	count: u32,
	resets_at: Instant,
}

/// Event limiter owned by a single connection session.
///
/// The window lives and dies with the session, so there is no shared map to collect.
#[derive(Debug, Clone)]
pub struct EventRateLimiter {
	policy: RateLimitPolicy,
	window: Option<Window>,
}

impl EventRateLimiter {
	pub fn new(policy: RateLimitPolicy) -> Self {
		Self { policy, window: None }
	}

	/// Count one event at `now`.
	///
	/// Connections without an identity are never limited.
	pub fn check(&mut self, identity: Option<&UserId>, now: Instant) -> Result<(), RateLimited> {
		if identity.is_none() {
			return Ok(());
		}

		match self.window.as_mut() {
			Some(w) if now < w.resets_at => {
				if w.count < self.policy.capacity {
					w.count += 1;
					Ok(())
				} else {
					Err(RateLimited {
						retry_after: w.resets_at.saturating_duration_since(now),
					})
				}
			}
			_ => {
				self.window = Some(Window {
					count: 1,
					resets_at: now + self.policy.window,
				});
				Ok(())
			}
		}
	}

	/// Events counted in the current window (0 when none is open).
	pub fn used(&self, now: Instant) -> u32 {
		match self.window {
			Some(w) if now < w.resets_at => w.count,
			_ => 0,
		}
	}
}
