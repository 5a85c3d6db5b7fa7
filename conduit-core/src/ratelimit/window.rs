use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RateLimiter, Utilisation, rate_limited};
use crate::error::Result;

struct FixedState {
	count: u32,
	window_start: Instant,
}

/// Counts requests in the current fixed-size window, resetting the count
/// the instant the window rolls over. Simple and cheap, but permits up to
/// 2x `limit` across a window boundary (a burst at the tail of one window
/// immediately followed by a burst at the head of the next).
pub struct FixedWindow {
	limit: u32,
	window: Duration,
	state: Mutex<FixedState>,
}

impl FixedWindow {
	pub fn new(limit: u32, window: Duration) -> Self {
		Self { limit, window, state: Mutex::new(FixedState { count: 0, window_start: Instant::now() }) }
	}
}

#[async_trait]
impl RateLimiter for FixedWindow {
	fn try_acquire(&self, cost: u32) -> Result<()> {
		let mut state = self.state.lock();
		let now = Instant::now();
		if now.saturating_duration_since(state.window_start) >= self.window {
			state.window_start = now;
			state.count = 0;
		}
		if state.count + cost <= self.limit {
			state.count += cost;
			Ok(())
		} else {
			let remaining = self.window.saturating_sub(now.saturating_duration_since(state.window_start));
			Err(rate_limited(Some(remaining)))
		}
	}

	fn current(&self) -> Utilisation {
		let state = self.state.lock();
		Utilisation {
			available: (self.limit - state.count.min(self.limit)) as f64,
			capacity: self.limit as f64,
			utilisation: state.count as f64 / self.limit.max(1) as f64,
		}
	}

	fn reset(&self) {
		let mut state = self.state.lock();
		state.count = 0;
		state.window_start = Instant::now();
	}
}

/// Tracks individual request timestamps in a rolling window, evicting any
/// older than `window` before counting. More accurate than
/// [`FixedWindow`] at the boundary, at the cost of O(limit) bookkeeping.
pub struct SlidingWindow {
	limit: u32,
	window: Duration,
	timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
	pub fn new(limit: u32, window: Duration) -> Self {
		Self { limit, window, timestamps: Mutex::new(VecDeque::new()) }
	}

	fn evict_expired(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
		while let Some(&front) = timestamps.front() {
			if now.saturating_duration_since(front) >= self.window {
				timestamps.pop_front();
			} else {
				break;
			}
		}
	}
}

#[async_trait]
impl RateLimiter for SlidingWindow {
	fn try_acquire(&self, cost: u32) -> Result<()> {
		let mut timestamps = self.timestamps.lock();
		let now = Instant::now();
		self.evict_expired(&mut timestamps, now);
		if timestamps.len() as u32 + cost <= self.limit {
			for _ in 0..cost {
				timestamps.push_back(now);
			}
			Ok(())
		} else {
			let oldest = *timestamps.front().expect("limit > 0 implies at least one entry when full");
			let retry_after = self.window.saturating_sub(now.saturating_duration_since(oldest));
			Err(rate_limited(Some(retry_after)))
		}
	}

	fn current(&self) -> Utilisation {
		let mut timestamps = self.timestamps.lock();
		self.evict_expired(&mut timestamps, Instant::now());
		Utilisation {
			available: (self.limit - (timestamps.len() as u32).min(self.limit)) as f64,
			capacity: self.limit as f64,
			utilisation: timestamps.len() as f64 / self.limit.max(1) as f64,
		}
	}

	fn reset(&self) {
		self.timestamps.lock().clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::thread::sleep;

	#[test]
	fn fixed_window_resets_on_rollover() {
		let limiter = FixedWindow::new(1, Duration::from_millis(10));
		assert!(limiter.try_acquire(1).is_ok());
		assert!(limiter.try_acquire(1).is_err());
		sleep(Duration::from_millis(15));
		assert!(limiter.try_acquire(1).is_ok());
	}

	#[test]
	fn sliding_window_evicts_only_expired_entries() {
		let limiter = SlidingWindow::new(2, Duration::from_millis(20));
		assert!(limiter.try_acquire(1).is_ok());
		sleep(Duration::from_millis(10));
		assert!(limiter.try_acquire(1).is_ok());
		assert!(limiter.try_acquire(1).is_err());
		sleep(Duration::from_millis(15));
		// first entry (from ~25ms ago) has expired, second (~15ms ago) hasn't
		assert!(limiter.try_acquire(1).is_ok());
	}
}
