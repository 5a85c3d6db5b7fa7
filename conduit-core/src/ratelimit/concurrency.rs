use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Duration, timeout};

use crate::error::{Error, Result};

/// The fifth algorithm: bounds *concurrent* in-flight work rather than a
/// rate over time. Unlike the other four, acquiring genuinely waits (up to
/// a deadline) rather than refusing instantly, since "capacity" here means
/// a slot freed by someone else finishing, not a clock ticking forward.
pub struct ConcurrencyGate {
	semaphore: Arc<Semaphore>,
}

/// Held for the duration of one unit of concurrent work; releases its slot
/// on drop.
pub struct Permit(#[allow(dead_code)] OwnedSemaphorePermit);

impl ConcurrencyGate {
	pub fn new(max_concurrent: usize) -> Self {
		Self { semaphore: Arc::new(Semaphore::new(max_concurrent)) }
	}

	/// Waits up to `deadline` for a free slot.
	pub async fn acquire(&self, deadline: Duration) -> Result<Permit> {
		match timeout(deadline, self.semaphore.clone().acquire_owned()).await {
			Ok(Ok(permit)) => Ok(Permit(permit)),
			Ok(Err(_)) => Err(Error::PoolClosed),
			Err(_) => Err(Error::Timeout { scope: crate::error::TimeoutScope::Acquire }),
		}
	}

	pub fn available_permits(&self) -> usize {
		self.semaphore.available_permits()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn blocks_until_a_slot_frees() {
		let gate = ConcurrencyGate::new(1);
		let first = gate.acquire(Duration::from_millis(100)).await.unwrap();
		assert_eq!(gate.available_permits(), 0);
		let gate2 = ConcurrencyGate { semaphore: gate.semaphore.clone() };
		let handle = tokio::spawn(async move { gate2.acquire(Duration::from_millis(200)).await });
		tokio::time::sleep(Duration::from_millis(20)).await;
		drop(first);
		assert!(handle.await.unwrap().is_ok());
	}

	#[tokio::test]
	async fn times_out_when_no_slot_frees() {
		let gate = ConcurrencyGate::new(1);
		let _held = gate.acquire(Duration::from_millis(100)).await.unwrap();
		let err = gate.acquire(Duration::from_millis(10)).await.unwrap_err();
		assert!(matches!(err, Error::Timeout { .. }));
	}
}
