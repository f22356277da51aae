//! Sliding-window attempt counter for sensitive actions (login, password reset).
//!
//! Each action key owns an ordered queue of attempt instants. Reads prune every instant that
//! fell out of the window before answering, so a stale attempt can never extend a block.

// self
use crate::{_prelude::*, config::duration_ms};

/// Attempt budget for one action key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
	/// Attempts allowed inside the window before the key is blocked.
	pub max_attempts: u32,
	/// Trailing window length.
	#[serde(rename = "windowMs", with = "duration_ms")]
	pub window: Duration,
}
impl RateLimitPolicy {
	/// Creates a policy allowing `max_attempts` per `window`.
	pub const fn new(max_attempts: u32, window: Duration) -> Self {
		Self { max_attempts, window }
	}
}

/// Result of [`RateLimiter::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The action may proceed immediately.
	Allow,
	/// The action is blocked until the directive allows it.
	Delay(RetryDirective),
}
impl RateLimitDecision {
	/// Returns `true` for [`RateLimitDecision::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow)
	}

	/// Converts the decision into a [`Result`], mapping delays to [`Error::RateLimited`].
	pub fn into_result(self, action: &str) -> Result<()> {
		match self {
			Self::Allow => Ok(()),
			Self::Delay(directive) => Err(Error::RateLimited {
				action: action.to_owned(),
				retry_after: directive.recommended_backoff,
			}),
		}
	}
}

/// Advises callers when to retry after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when it is safe to retry.
	pub earliest_retry_at: OffsetDateTime,
	/// Exact time remaining until the oldest attempt leaves the window.
	pub recommended_backoff: Duration,
	/// Optional descriptive string.
	pub reason: Option<String>,
}
impl RetryDirective {
	/// Creates a new directive with the provided timing metadata.
	pub fn new(earliest_retry_at: OffsetDateTime, recommended_backoff: Duration) -> Self {
		Self { earliest_retry_at, recommended_backoff, reason: None }
	}

	/// Adds a human-readable reason.
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}
}

type WindowMap = Arc<Mutex<HashMap<String, VecDeque<OffsetDateTime>>>>;

/// Per-key sliding-window limiter; clones share the same windows.
#[derive(Clone, Debug, Default)]
pub struct RateLimiter(WindowMap);
impl RateLimiter {
	/// Records an attempt for `key` at the current instant.
	pub fn record_attempt(&self, key: &str) {
		self.record_attempt_at(key, OffsetDateTime::now_utc());
	}

	/// Records an attempt for `key` at `now`.
	pub fn record_attempt_at(&self, key: &str, now: OffsetDateTime) {
		let mut windows = self.0.lock();
		let attempts = windows.entry(key.to_owned()).or_default();

		// Keep the queue ordered even if callers feed instants out of order.
		let position = attempts.partition_point(|instant| *instant <= now);

		attempts.insert(position, now);
	}

	/// Returns `true` when `key` has at least `max_attempts` attempts inside `window`.
	pub fn is_blocked(&self, key: &str, max_attempts: u32, window: Duration) -> bool {
		self.is_blocked_at(key, max_attempts, window, OffsetDateTime::now_utc())
	}

	/// Same as [`is_blocked`](Self::is_blocked) evaluated at `now`.
	pub fn is_blocked_at(
		&self,
		key: &str,
		max_attempts: u32,
		window: Duration,
		now: OffsetDateTime,
	) -> bool {
		self.attempts_at(key, window, now) >= max_attempts as usize
	}

	/// Time until the oldest attempt inside `window` expires, or zero when none is recorded.
	pub fn remaining_time(&self, key: &str, window: Duration) -> Duration {
		self.remaining_time_at(key, window, OffsetDateTime::now_utc())
	}

	/// Same as [`remaining_time`](Self::remaining_time) evaluated at `now`.
	pub fn remaining_time_at(&self, key: &str, window: Duration, now: OffsetDateTime) -> Duration {
		self.with_pruned(key, window, now, |attempts| {
			attempts.front().map_or(Duration::ZERO, |oldest| {
				let remaining = window - (now - *oldest);

				if remaining.is_positive() { remaining } else { Duration::ZERO }
			})
		})
	}

	/// Number of attempts for `key` inside `window` right now.
	pub fn attempts(&self, key: &str, window: Duration) -> usize {
		self.attempts_at(key, window, OffsetDateTime::now_utc())
	}

	/// Number of attempts for `key` inside `window` at `now`.
	pub fn attempts_at(&self, key: &str, window: Duration, now: OffsetDateTime) -> usize {
		self.with_pruned(key, window, now, |attempts| attempts.len())
	}

	/// Evaluates `policy` for `key` at the current instant.
	pub fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
		self.check_at(key, policy, OffsetDateTime::now_utc())
	}

	/// Evaluates `policy` for `key` at `now`.
	pub fn check_at(
		&self,
		key: &str,
		policy: &RateLimitPolicy,
		now: OffsetDateTime,
	) -> RateLimitDecision {
		if !self.is_blocked_at(key, policy.max_attempts, policy.window, now) {
			return RateLimitDecision::Allow;
		}

		let remaining = self.remaining_time_at(key, policy.window, now);

		RateLimitDecision::Delay(
			RetryDirective::new(now + remaining, remaining)
				.with_reason(format!("Too many `{key}` attempts.")),
		)
	}

	/// Forgets every attempt recorded for `key`.
	pub fn reset(&self, key: &str) {
		self.0.lock().remove(key);
	}

	fn with_pruned<T>(
		&self,
		key: &str,
		window: Duration,
		now: OffsetDateTime,
		f: impl FnOnce(&VecDeque<OffsetDateTime>) -> T,
	) -> T {
		let mut windows = self.0.lock();
		let Some(attempts) = windows.get_mut(key) else {
			return f(&VecDeque::new());
		};

		while attempts.front().is_some_and(|oldest| now - *oldest >= window) {
			attempts.pop_front();
		}

		if attempts.is_empty() {
			windows.remove(key);

			return f(&VecDeque::new());
		}

		f(attempts)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const WINDOW: Duration = Duration::milliseconds(900_000);
	const T0: OffsetDateTime = macros::datetime!(2025-03-01 08:00 UTC);

	#[test]
	fn five_attempts_block_and_four_do_not() {
		let limiter = RateLimiter::default();

		for _ in 0..4 {
			limiter.record_attempt_at("login", T0);
		}

		assert!(!limiter.is_blocked_at("login", 5, WINDOW, T0 + Duration::seconds(1)));

		limiter.record_attempt_at("login", T0);

		assert!(limiter.is_blocked_at("login", 5, WINDOW, T0 + Duration::seconds(1)));
		assert_eq!(
			limiter.remaining_time_at("login", WINDOW, T0 + Duration::seconds(1)),
			Duration::milliseconds(899_000)
		);
	}

	#[test]
	fn stale_attempts_are_pruned_on_read() {
		let limiter = RateLimiter::default();

		for offset in 0..5 {
			limiter.record_attempt_at("login", T0 + Duration::seconds(offset));
		}

		let after_first_expires = T0 + WINDOW;

		assert_eq!(limiter.attempts_at("login", WINDOW, after_first_expires), 4);
		assert!(!limiter.is_blocked_at("login", 5, WINDOW, after_first_expires));
		assert_eq!(
			limiter.remaining_time_at("login", WINDOW, after_first_expires),
			Duration::seconds(1)
		);
		assert_eq!(
			limiter.remaining_time_at("login", WINDOW, T0 + WINDOW + Duration::minutes(1)),
			Duration::ZERO
		);
	}

	#[test]
	fn keys_are_independent() {
		let limiter = RateLimiter::default();

		for _ in 0..3 {
			limiter.record_attempt_at("password_reset", T0);
		}

		assert!(limiter.is_blocked_at("password_reset", 3, WINDOW, T0));
		assert!(!limiter.is_blocked_at("login", 3, WINDOW, T0));
		assert_eq!(limiter.remaining_time_at("login", WINDOW, T0), Duration::ZERO);

		limiter.reset("password_reset");

		assert!(!limiter.is_blocked_at("password_reset", 3, WINDOW, T0));
	}

	#[test]
	fn check_reports_exact_wait() {
		let limiter = RateLimiter::default();
		let policy = RateLimitPolicy::new(2, Duration::minutes(10));

		limiter.record_attempt_at("login", T0);

		assert!(limiter.check_at("login", &policy, T0).is_allowed());

		limiter.record_attempt_at("login", T0 + Duration::minutes(1));

		let now = T0 + Duration::minutes(4);

		match limiter.check_at("login", &policy, now) {
			RateLimitDecision::Delay(directive) => {
				assert_eq!(directive.recommended_backoff, Duration::minutes(6));
				assert_eq!(directive.earliest_retry_at, T0 + Duration::minutes(10));
			},
			RateLimitDecision::Allow => panic!("Second attempt should exhaust the policy."),
		}

		let err = limiter
			.check_at("login", &policy, now)
			.into_result("login")
			.expect_err("Blocked decision should map to an error.");

		assert!(matches!(err, Error::RateLimited { retry_after, .. } if retry_after == Duration::minutes(6)));
	}

	#[test]
	fn policy_uses_millisecond_wire_format() {
		let policy: RateLimitPolicy = serde_json::from_str(r#"{"maxAttempts":5,"windowMs":900000}"#)
			.expect("Policy should deserialize.");

		assert_eq!(policy, RateLimitPolicy::new(5, WINDOW));
	}
}
