//! Dual request/token budgets with continuous refill and a post-throttle cooldown.

// crates.io
use serde::Serialize;
// self
use crate::_prelude::*;

/// Default pause applied after the provider signals a rate limit.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15);

/// Point-in-time view of the tracker budgets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CapacitySnapshot {
	/// Request units currently available.
	pub available_requests: f64,
	/// Token units currently available.
	pub available_tokens: f64,
	/// Configured request cap per minute.
	pub max_requests_per_minute: f64,
	/// Configured token cap per minute.
	pub max_tokens_per_minute: f64,
}

/// Two leaky-bucket budgets modelling the provider's request-rate and token-rate ceilings.
///
/// Budgets start full and refill continuously at `cap / 60` units per second, never exceeding
/// their caps. All operations take the current instant explicitly.
#[derive(Clone, Debug)]
pub struct CapacityTracker {
	max_requests_per_minute: f64,
	max_tokens_per_minute: f64,
	available_requests: f64,
	available_tokens: f64,
	last_refill: Instant,
	last_throttle: Option<Instant>,
	cooldown: Duration,
}
impl CapacityTracker {
	/// Create a tracker with full budgets as of `now`.
	pub fn new(
		max_requests_per_minute: f64,
		max_tokens_per_minute: f64,
		cooldown: Duration,
		now: Instant,
	) -> Self {
		Self {
			max_requests_per_minute,
			max_tokens_per_minute,
			available_requests: max_requests_per_minute,
			available_tokens: max_tokens_per_minute,
			last_refill: now,
			last_throttle: None,
			cooldown,
		}
	}

	/// Advance both budgets by the time elapsed since the previous refill.
	pub fn refill(&mut self, now: Instant) {
		let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

		if elapsed > 0.0 {
			self.available_requests = (self.available_requests
				+ self.max_requests_per_minute * elapsed / 60.0)
				.min(self.max_requests_per_minute);
			self.available_tokens = (self.available_tokens
				+ self.max_tokens_per_minute * elapsed / 60.0)
				.min(self.max_tokens_per_minute);
			self.last_refill = now;
		}
	}

	/// Reserve one request and `cost` tokens, only if both are available.
	pub fn try_reserve(&mut self, cost: u64) -> bool {
		let cost = cost as f64;

		if self.available_requests >= 1.0 && self.available_tokens >= cost {
			self.available_requests -= 1.0;
			self.available_tokens -= cost;

			true
		} else {
			false
		}
	}

	/// Time until a reservation of `cost` could succeed, or `None` when it never can.
	pub fn wait_for(&self, cost: u64) -> Option<Duration> {
		let cost = cost as f64;

		if cost > self.max_tokens_per_minute || self.max_requests_per_minute < 1.0 {
			return None;
		}

		let request_wait = deficit_seconds(1.0, self.available_requests, self.max_requests_per_minute);
		let token_wait = deficit_seconds(cost, self.available_tokens, self.max_tokens_per_minute);

		Some(Duration::from_secs_f64(request_wait.max(token_wait)))
	}

	/// Record a provider throttling signal observed at `now`.
	pub fn note_throttle(&mut self, now: Instant) {
		self.last_throttle = Some(self.last_throttle.map_or(now, |previous| previous.max(now)));
	}

	/// Remaining pause after the latest throttling signal; zero when no cooldown is active.
	pub fn cooldown_remaining(&self, now: Instant) -> Duration {
		self.last_throttle
			.map(|at| (at + self.cooldown).saturating_duration_since(now))
			.unwrap_or(Duration::ZERO)
	}

	/// Instant of the latest throttling signal, if any.
	pub fn last_throttle(&self) -> Option<Instant> {
		self.last_throttle
	}

	/// Capture the current budgets.
	pub fn snapshot(&self) -> CapacitySnapshot {
		CapacitySnapshot {
			available_requests: self.available_requests,
			available_tokens: self.available_tokens,
			max_requests_per_minute: self.max_requests_per_minute,
			max_tokens_per_minute: self.max_tokens_per_minute,
		}
	}
}

fn deficit_seconds(needed: f64, available: f64, per_minute: f64) -> f64 {
	if available >= needed { 0.0 } else { (needed - available) * 60.0 / per_minute }
}
