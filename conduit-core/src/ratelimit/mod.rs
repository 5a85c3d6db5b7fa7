//! C11: local rate limiting, generalized from the teacher's single
//! token-bucket-ish local limiter into five selectable algorithms.

pub mod concurrency;
pub mod leaky_bucket;
pub mod token_bucket;
pub mod window;

pub use concurrency::ConcurrencyGate;
pub use leaky_bucket::LeakyBucket;
pub use token_bucket::TokenBucket;
pub use window::{FixedWindow, SlidingWindow};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// A non-blocking, synchronous rate check: instantaneous in time, costs
/// nothing if it refuses. Contrast with [`ConcurrencyGate`], whose acquire
/// is async because it actually waits for capacity.
#[async_trait]
pub trait RateLimiter: Send + Sync {
	/// Attempts to consume `cost` units of capacity now. On refusal, returns
	/// [`Error::RateLimited`] carrying how long the caller should wait
	/// before retrying, if known.
	fn try_acquire(&self, cost: u32) -> Result<()>;

	/// Current occupancy, for `current() -> {available, capacity, utilisation}`.
	fn current(&self) -> Utilisation;

	/// Resets the limiter to its initial (empty/full) state.
	fn reset(&self);

	/// Waits (sleeping on the refusal's `retry_after` hint) until `cost`
	/// units are granted or `deadline` elapses, whichever comes first. The
	/// time-based algorithms (token/leaky bucket, fixed/sliding window) are
	/// refuse-then-retry by nature; the default impl turns that into the
	/// spec's `acquire(cost, deadline) -> Result<Granted, Rejected>` contract
	/// without every algorithm needing its own sleep loop.
	async fn acquire(&self, cost: u32, deadline: Duration) -> Result<()> {
		let start = tokio::time::Instant::now();
		loop {
			match self.try_acquire(cost) {
				Ok(()) => return Ok(()),
				Err(Error::RateLimited { retry_after }) => {
					let elapsed = start.elapsed();
					if elapsed >= deadline {
						return Err(Error::RateLimited { retry_after });
					}
					let remaining = deadline - elapsed;
					let sleep_for = retry_after.unwrap_or(Duration::from_millis(5)).min(remaining);
					tokio::time::sleep(sleep_for).await;
				},
				Err(other) => return Err(other),
			}
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Utilisation {
	pub available: f64,
	pub capacity: f64,
	pub utilisation: f64,
}

pub(crate) fn rate_limited(retry_after: Option<std::time::Duration>) -> Error {
	Error::RateLimited { retry_after }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_algorithm_implements_the_shared_trait() {
		fn assert_impl<T: RateLimiter>(_: &T) {}
		assert_impl(&TokenBucket::new(10, 10, Duration::from_secs(1)));
		assert_impl(&LeakyBucket::new(10, Duration::from_secs(1)));
		assert_impl(&FixedWindow::new(10, Duration::from_secs(1)));
		assert_impl(&SlidingWindow::new(10, Duration::from_secs(1)));
	}

	#[tokio::test]
	async fn acquire_waits_for_a_token_bucket_refill() {
		let bucket = TokenBucket::new(1000, 1000, Duration::from_secs(1));
		bucket.try_acquire(1000).unwrap();
		let start = tokio::time::Instant::now();
		bucket.acquire(500, Duration::from_secs(2)).await.unwrap();
		assert!(start.elapsed() >= Duration::from_millis(400));
	}

	#[tokio::test]
	async fn acquire_respects_the_deadline() {
		let bucket = TokenBucket::new(1, 1, Duration::from_secs(10));
		bucket.try_acquire(1).unwrap();
		let err = bucket.acquire(1, Duration::from_millis(20)).await.unwrap_err();
		assert!(matches!(err, Error::RateLimited { .. }));
	}
}
