//! C8: reconnection backoff strategies.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
	Fixed { delay: Duration },
	Linear { base: Duration, increment: Duration, max: Duration },
	Exponential { base: Duration, factor: f64, max: Duration },
}

impl Default for BackoffStrategy {
	fn default() -> Self {
		BackoffStrategy::Exponential {
			base: Duration::from_millis(200),
			factor: 2.0,
			max: Duration::from_secs(30),
		}
	}
}

impl BackoffStrategy {
	/// Delay before attempt number `attempt` (1-indexed: the first retry is
	/// attempt 1), before jitter is applied.
	fn base_delay(&self, attempt: u32) -> Duration {
		match *self {
			BackoffStrategy::Fixed { delay } => delay,
			BackoffStrategy::Linear { base, increment, max } => {
				let scaled = increment.saturating_mul(attempt.saturating_sub(1));
				(base + scaled).min(max)
			},
			BackoffStrategy::Exponential { base, factor, max } => {
				let multiplier = factor.powi(attempt.saturating_sub(1) as i32);
				let millis = (base.as_millis() as f64 * multiplier).min(max.as_millis() as f64);
				Duration::from_millis(millis as u64)
			},
		}
	}

	/// Delay before attempt number `attempt`, with no jitter applied. This is
	/// the deterministic progression spec §8 property #7 and scenario S1
	/// test against (`1s, 2s, 4s, 8s, ...`).
	pub fn delay_for(&self, attempt: u32) -> Duration {
		self.base_delay(attempt.max(1))
	}

	/// As [`BackoffStrategy::delay_for`], but with full jitter applied: a
	/// uniformly random duration in `[0, base_delay]`. Full jitter (rather
	/// than none or "equal") avoids synchronized retry storms across many
	/// reconnecting clients; only used when a [`ReconnectPolicy`] has jitter
	/// enabled (spec §4.8: "with ±jitter ... when enabled").
	pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
		let base = self.delay_for(attempt);
		if base.is_zero() {
			return base;
		}
		let jittered_millis = rand::rng().random_range(0..=base.as_millis() as u64);
		Duration::from_millis(jittered_millis)
	}
}

/// Drives a reconnect loop's attempt counter and decides whether to keep
/// trying. `jitter` is off by default, matching spec §4.8's "when enabled"
/// — the deterministic progression is the default so callers get the
/// documented `1s, 2s, 4s, 8s, ...` behavior unless they opt into jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
	strategy: BackoffStrategy,
	max_attempts: Option<u32>,
	jitter: bool,
}

impl ReconnectPolicy {
	pub fn new(strategy: BackoffStrategy, max_attempts: Option<u32>) -> Self {
		Self { strategy, max_attempts, jitter: false }
	}

	/// Enables full jitter on top of the strategy's base delay.
	pub fn with_jitter(mut self, jitter: bool) -> Self {
		self.jitter = jitter;
		self
	}

	pub fn should_reconnect(&self, attempt: u32) -> bool {
		match self.max_attempts {
			Some(max) => attempt <= max,
			None => true,
		}
	}

	pub fn delay_for(&self, attempt: u32) -> Duration {
		if self.jitter {
			self.strategy.jittered_delay_for(attempt)
		} else {
			self.strategy.delay_for(attempt)
		}
	}
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self::new(BackoffStrategy::default(), None)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_strategy_delay_for_is_unjittered_by_default() {
		let strategy = BackoffStrategy::Fixed { delay: Duration::from_millis(100) };
		for attempt in 1..5 {
			assert_eq!(strategy.delay_for(attempt), Duration::from_millis(100));
		}
	}

	#[test]
	fn fixed_strategy_jittered_delay_never_exceeds_the_fixed_delay() {
		let strategy = BackoffStrategy::Fixed { delay: Duration::from_millis(100) };
		for attempt in 1..5 {
			assert!(strategy.jittered_delay_for(attempt) <= Duration::from_millis(100));
		}
	}

	#[test]
	fn linear_strategy_base_delay_grows_then_caps() {
		let strategy = BackoffStrategy::Linear {
			base: Duration::from_millis(100),
			increment: Duration::from_millis(50),
			max: Duration::from_millis(180),
		};
		assert_eq!(strategy.base_delay(1), Duration::from_millis(100));
		assert_eq!(strategy.base_delay(2), Duration::from_millis(150));
		assert_eq!(strategy.base_delay(3), Duration::from_millis(180)); // capped
	}

	#[test]
	fn exponential_strategy_base_delay_doubles_then_caps() {
		let strategy = BackoffStrategy::Exponential {
			base: Duration::from_millis(100),
			factor: 2.0,
			max: Duration::from_millis(350),
		};
		assert_eq!(strategy.base_delay(1), Duration::from_millis(100));
		assert_eq!(strategy.base_delay(2), Duration::from_millis(200));
		assert_eq!(strategy.base_delay(3), Duration::from_millis(350)); // 400 capped
	}

	#[test]
	fn policy_respects_max_attempts() {
		let policy = ReconnectPolicy::new(BackoffStrategy::default(), Some(3));
		assert!(policy.should_reconnect(3));
		assert!(!policy.should_reconnect(4));
	}

	#[test]
	fn policy_with_no_max_always_reconnects() {
		let policy = ReconnectPolicy::new(BackoffStrategy::default(), None);
		assert!(policy.should_reconnect(10_000));
	}

	#[test]
	fn policy_without_jitter_follows_the_deterministic_exponential_progression() {
		// Scenario S1: exponential, multiplier 2, initial 1s, max 30s.
		let strategy = BackoffStrategy::Exponential {
			base: Duration::from_secs(1),
			factor: 2.0,
			max: Duration::from_secs(30),
		};
		let policy = ReconnectPolicy::new(strategy, None);
		assert_eq!(policy.delay_for(1), Duration::from_secs(1));
		assert_eq!(policy.delay_for(2), Duration::from_secs(2));
		assert_eq!(policy.delay_for(3), Duration::from_secs(4));
		assert_eq!(policy.delay_for(4), Duration::from_secs(8));
	}

	#[test]
	fn policy_with_jitter_enabled_never_exceeds_the_base_delay() {
		let strategy = BackoffStrategy::Fixed { delay: Duration::from_millis(100) };
		let policy = ReconnectPolicy::new(strategy, None).with_jitter(true);
		for attempt in 1..5 {
			assert!(policy.delay_for(attempt) <= Duration::from_millis(100));
		}
	}

	proptest::proptest! {
		/// Property #8 from spec §8: with exponential backoff and no jitter,
		/// `next_delay(n+1) >= next_delay(n)` up to `max_interval`. Checked
		/// against `base_delay` directly since `delay_for` applies jitter.
		#[test]
		fn prop_exponential_base_delay_is_monotonic(
			attempt in 1u32..50,
			factor in 1.0f64..4.0,
		) {
			let strategy = BackoffStrategy::Exponential {
				base: Duration::from_millis(100),
				factor,
				max: Duration::from_secs(30),
			};
			let a = strategy.base_delay(attempt);
			let b = strategy.base_delay(attempt + 1);
			proptest::prop_assert!(b >= a);
		}
	}
}
