use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RateLimiter, Utilisation, rate_limited};
use crate::error::Result;

struct State {
	level: f64,
	last_leak: Instant,
}

/// Leaky bucket: requests add to a level that drains at a fixed rate;
/// refused once the level would exceed `capacity`.
pub struct LeakyBucket {
	capacity: f64,
	leak_per_nanos: f64,
	state: Mutex<State>,
}

impl LeakyBucket {
	pub fn new(capacity: u32, drain_period: Duration) -> Self {
		Self {
			capacity: capacity as f64,
			leak_per_nanos: capacity as f64 / drain_period.as_nanos().max(1) as f64,
			state: Mutex::new(State { level: 0.0, last_leak: Instant::now() }),
		}
	}

	fn leak(&self, state: &mut State) {
		let now = Instant::now();
		let elapsed = now.saturating_duration_since(state.last_leak);
		state.level = (state.level - elapsed.as_nanos() as f64 * self.leak_per_nanos).max(0.0);
		state.last_leak = now;
	}
}

#[async_trait]
impl RateLimiter for LeakyBucket {
	fn try_acquire(&self, cost: u32) -> Result<()> {
		let mut state = self.state.lock();
		self.leak(&mut state);
		if state.level + cost as f64 <= self.capacity {
			state.level += cost as f64;
			Ok(())
		} else {
			let overflow = state.level + cost as f64 - self.capacity;
			let wait_nanos = overflow / self.leak_per_nanos.max(f64::MIN_POSITIVE);
			Err(rate_limited(Some(Duration::from_nanos(wait_nanos as u64))))
		}
	}

	fn current(&self) -> Utilisation {
		let mut state = self.state.lock();
		self.leak(&mut state);
		Utilisation {
			available: self.capacity - state.level,
			capacity: self.capacity,
			utilisation: state.level / self.capacity.max(f64::MIN_POSITIVE),
		}
	}

	fn reset(&self) {
		let mut state = self.state.lock();
		state.level = 0.0;
		state.last_leak = Instant::now();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::thread::sleep;

	#[test]
	fn fills_then_refuses() {
		let bucket = LeakyBucket::new(2, Duration::from_secs(1));
		assert!(bucket.try_acquire(1).is_ok());
		assert!(bucket.try_acquire(1).is_ok());
		assert!(bucket.try_acquire(1).is_err());
	}

	#[test]
	fn drains_over_time() {
		let bucket = LeakyBucket::new(1, Duration::from_millis(10));
		assert!(bucket.try_acquire(1).is_ok());
		assert!(bucket.try_acquire(1).is_err());
		sleep(Duration::from_millis(15));
		assert!(bucket.try_acquire(1).is_ok());
	}
}
