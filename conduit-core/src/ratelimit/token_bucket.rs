use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RateLimiter, Utilisation, rate_limited};
use crate::error::Result;

struct State {
	tokens: f64,
	last_refill: Instant,
}

/// Classic token bucket: capacity refills continuously at `rate` tokens per
/// `per`, capped at `capacity`.
pub struct TokenBucket {
	capacity: f64,
	refill_per_nanos: f64,
	state: Mutex<State>,
}

impl TokenBucket {
	pub fn new(capacity: u32, rate: u32, per: Duration) -> Self {
		Self {
			capacity: capacity as f64,
			refill_per_nanos: rate as f64 / per.as_nanos().max(1) as f64,
			state: Mutex::new(State { tokens: capacity as f64, last_refill: Instant::now() }),
		}
	}

	fn refill(&self, state: &mut State) {
		let now = Instant::now();
		let elapsed = now.saturating_duration_since(state.last_refill);
		state.tokens = (state.tokens + elapsed.as_nanos() as f64 * self.refill_per_nanos).min(self.capacity);
		state.last_refill = now;
	}
}

#[async_trait]
impl RateLimiter for TokenBucket {
	fn try_acquire(&self, cost: u32) -> Result<()> {
		let mut state = self.state.lock();
		self.refill(&mut state);
		if state.tokens >= cost as f64 {
			state.tokens -= cost as f64;
			Ok(())
		} else {
			let deficit = cost as f64 - state.tokens;
			let wait_nanos = deficit / self.refill_per_nanos.max(f64::MIN_POSITIVE);
			Err(rate_limited(Some(Duration::from_nanos(wait_nanos as u64))))
		}
	}

	fn current(&self) -> Utilisation {
		let mut state = self.state.lock();
		self.refill(&mut state);
		Utilisation {
			available: state.tokens,
			capacity: self.capacity,
			utilisation: 1.0 - state.tokens / self.capacity.max(f64::MIN_POSITIVE),
		}
	}

	fn reset(&self) {
		let mut state = self.state.lock();
		state.tokens = self.capacity;
		state.last_refill = Instant::now();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::thread::sleep;

	#[test]
	fn drains_then_refuses() {
		let bucket = TokenBucket::new(2, 1, Duration::from_secs(1));
		assert!(bucket.try_acquire(1).is_ok());
		assert!(bucket.try_acquire(1).is_ok());
		assert!(bucket.try_acquire(1).is_err());
	}

	#[test]
	fn refills_over_time() {
		let bucket = TokenBucket::new(1, 1000, Duration::from_secs(1));
		assert!(bucket.try_acquire(1).is_ok());
		assert!(bucket.try_acquire(1).is_err());
		sleep(Duration::from_millis(5));
		assert!(bucket.try_acquire(1).is_ok());
	}
}
