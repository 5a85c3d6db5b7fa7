//! C6: matches outgoing requests to their eventual response by id.
//!
//! Grounded on the teacher's JSON-RPC id handling: a monotone id allocator
//! paired with a map of in-flight `oneshot::Sender`s that the receive loop
//! resolves by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Duration, timeout};

use crate::error::{Error, Result};
use crate::framing::wire::HEARTBEAT_FUNCTION_ID;

type Reply = std::result::Result<Vec<u8>, Error>;

/// Tracks outstanding requests by id, resolving each exactly once.
pub struct Correlator {
	next_id: AtomicU32,
	pending: Mutex<HashMap<u32, oneshot::Sender<Reply>>>,
}

impl Correlator {
	pub fn new() -> Self {
		Self {
			next_id: AtomicU32::new(0),
			pending: Mutex::new(HashMap::new()),
		}
	}

	/// Allocates the next request id, skipping the reserved values `0` and
	/// `0xFFFF` (the heartbeat tag), and registers a slot to receive its
	/// response. Returns [`Error::ResourceExhausted`] if that id is somehow
	/// already pending (the id space has wrapped all the way around while
	/// this request is still outstanding).
	pub fn begin(&self) -> Result<(u32, oneshot::Receiver<Reply>)> {
		let id = loop {
			let candidate = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
			if candidate != 0 && candidate != HEARTBEAT_FUNCTION_ID {
				break candidate;
			}
		};
		let (tx, rx) = oneshot::channel();
		let mut pending = self.pending.lock();
		if pending.contains_key(&id) {
			return Err(Error::ResourceExhausted(format!(
				"request id {id} still outstanding; id space exhausted"
			)));
		}
		pending.insert(id, tx);
		Ok((id, rx))
	}

	/// Resolves a pending request with its response payload. Returns `true`
	/// if a waiter was found (an unmatched id — e.g. after the waiter timed
	/// out and was dropped — is silently ignored, mirroring a dropped
	/// `oneshot::Sender` being a no-op for the receiver).
	pub fn resolve(&self, id: u32, payload: Vec<u8>) -> bool {
		let tx = self.pending.lock().remove(&id);
		match tx {
			Some(tx) => tx.send(Ok(payload)).is_ok(),
			None => false,
		}
	}

	/// Cancels a pending request without resolving it, dropping its sender
	/// so the waiter observes a closed channel and reports [`Error::Cancelled`].
	pub fn cancel(&self, id: u32) {
		self.pending.lock().remove(&id);
	}

	/// Fails every still-pending request with `error`, e.g. when the
	/// connection leaves `Connected` (spec §4.6/§7: "all pending requests
	/// fail with `ConnectionClosed`"). Each sender is consumed, so a waiter
	/// racing a concurrent `resolve`/`cancel` for the same id is unaffected.
	pub fn fail_all(&self, error: impl Fn() -> Error) {
		let pending: Vec<_> = self.pending.lock().drain().collect();
		for (_, tx) in pending {
			let _ = tx.send(Err(error()));
		}
	}

	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}

	/// Awaits the response for `id`, or [`Error::Timeout`] if `deadline`
	/// elapses first, cancelling the pending slot either way.
	pub async fn wait(&self, id: u32, rx: oneshot::Receiver<Reply>, deadline: Duration) -> Result<Vec<u8>> {
		match timeout(deadline, rx).await {
			Ok(Ok(reply)) => reply,
			Ok(Err(_)) => Err(Error::Cancelled),
			Err(_) => {
				self.cancel(id);
				Err(Error::Timeout { scope: crate::error::TimeoutScope::Request })
			},
		}
	}
}

impl Default for Correlator {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn begin_never_allocates_reserved_ids() {
		let correlator = Correlator::new();
		correlator.next_id.store(u32::MAX, Ordering::Relaxed);
		let (id, _rx) = correlator.begin().unwrap();
		assert_ne!(id, 0);
		assert_ne!(id, HEARTBEAT_FUNCTION_ID);
	}

	#[tokio::test]
	async fn resolve_delivers_to_the_right_waiter() {
		let correlator = Correlator::new();
		let (id, rx) = correlator.begin().unwrap();
		assert!(correlator.resolve(id, b"payload".to_vec()));
		assert_eq!(rx.await.unwrap().unwrap(), b"payload");
	}

	#[tokio::test]
	async fn wait_times_out_and_cleans_up() {
		let correlator = Correlator::new();
		let (id, rx) = correlator.begin().unwrap();
		assert_eq!(correlator.pending_count(), 1);
		let err = correlator.wait(id, rx, Duration::from_millis(10)).await.unwrap_err();
		assert!(matches!(err, Error::Timeout { .. }));
		assert_eq!(correlator.pending_count(), 0);
	}

	#[test]
	fn resolve_unknown_id_is_a_noop() {
		let correlator = Correlator::new();
		assert!(!correlator.resolve(999, b"x".to_vec()));
	}

	#[tokio::test]
	async fn fail_all_resolves_every_waiter_with_the_given_error() {
		let correlator = Correlator::new();
		let (_id1, rx1) = correlator.begin().unwrap();
		let (_id2, rx2) = correlator.begin().unwrap();
		correlator.fail_all(|| Error::ConnectionClosed);
		assert!(matches!(rx1.await.unwrap(), Err(Error::ConnectionClosed)));
		assert!(matches!(rx2.await.unwrap(), Err(Error::ConnectionClosed)));
		assert_eq!(correlator.pending_count(), 0);
	}
}
