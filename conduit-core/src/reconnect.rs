//! Ties the connection state machine (C7), the reconnection strategy (C8),
//! and the network-change observer (C9) into the actual auto-reconnection
//! engine spec.md's system overview names as the first of the four core
//! subsystems — `Connection`, `ReconnectPolicy`, and `NetworkObserver` are
//! each independently testable, but nothing redials on their own; this is
//! the loop that watches state changes and network events and drives
//! retries between them.
//!
//! Grounded on the teacher's XDS client retry loop
//! (`src/xds/client.rs::connect_internal`): sleep on a growing backoff,
//! then retry, racing the sleep against a cancellation signal via
//! `tokio::select!`. Here the race is three-way: the backoff sleep, a
//! `LinkUp` event (which pre-empts the wait per spec §4.9), and an explicit
//! stop.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_stream::StreamExt;

use crate::backoff::ReconnectPolicy;
use crate::connection::Connection;
use crate::error::Result;
use crate::network::{NetworkEvent, NetworkObserver};
use crate::state::ConnectionState;

/// Redials a connection's transport. Transport-specific (`conduit-tcp`
/// supplies one over `TcpStream`); this module owns only the retry/backoff/
/// preemption orchestration around whatever a dialer does.
#[async_trait]
pub trait Dialer: Send + Sync {
	async fn dial(&self, connection: Arc<Connection>) -> Result<()>;
}

/// Drives automatic reconnection for one connection for as long as the
/// returned [`ReconnectHandle`] is held: whenever the connection's state
/// becomes `Reconnecting{n}`, waits `policy.delay_for(n)` — pre-empted
/// immediately by a `LinkUp` event per spec §4.9 — then redials. A failed
/// redial steps the attempt counter and loops; once `policy.should_reconnect`
/// refuses a further attempt the connection settles into `Disconnected`.
pub struct ReconnectLoop {
	connection: Arc<Connection>,
	dialer: Arc<dyn Dialer>,
	policy: ReconnectPolicy,
	network: NetworkObserver,
}

impl ReconnectLoop {
	/// Spawns the loop as a background task bound to the returned handle.
	pub fn spawn(
		connection: Arc<Connection>,
		dialer: Arc<dyn Dialer>,
		policy: ReconnectPolicy,
		network: NetworkObserver,
	) -> ReconnectHandle {
		let (stop_tx, stop_rx) = watch::channel(false);
		let this = ReconnectLoop { connection, dialer, policy, network };
		let task = tokio::spawn(this.run(stop_rx));
		ReconnectHandle { stop: stop_tx, task }
	}

	async fn run(self, mut stop: watch::Receiver<bool>) {
		let mut state = self.connection.subscribe_state();
		loop {
			if *stop.borrow() {
				return;
			}
			// Checked before waiting, not just on the next `changed()`: a
			// fresh `watch::Receiver` starts "caught up" on the value that
			// was already current when it subscribed, so a connection that
			// enters `Reconnecting` before this loop starts watching would
			// otherwise never get its first attempt scheduled.
			if let ConnectionState::Reconnecting { attempt } = *state.borrow() {
				self.attempt(attempt, &mut stop).await;
			}
			tokio::select! {
				_ = stop.changed() => return,
				changed = state.changed() => {
					if changed.is_err() {
						return;
					}
				}
			}
		}
	}

	/// One reconnect attempt: wait out the backoff (or until pre-empted),
	/// then redial, unless something else already moved the connection out
	/// of the `Reconnecting{attempt}` state this attempt was scheduled for
	/// (e.g. the caller called `close()` concurrently).
	async fn attempt(&self, attempt: u32, stop: &mut watch::Receiver<bool>) {
		if !self.policy.should_reconnect(attempt) {
			tracing::debug!(connection_id = %self.connection.id(), attempt, "reconnect attempts exhausted, giving up");
			let _ = self.connection.give_up_reconnecting();
			return;
		}

		let delay = self.policy.delay_for(attempt);
		let mut link_up = std::pin::pin!(self.network.events());
		let wait_for_link_up = async {
			while let Some(event) = link_up.next().await {
				if matches!(event, NetworkEvent::LinkUp) {
					return;
				}
			}
		};
		tokio::select! {
			_ = stop.changed() => return,
			_ = tokio::time::sleep(delay) => {},
			_ = wait_for_link_up => {
				tracing::debug!(connection_id = %self.connection.id(), attempt, "link up, pre-empting backoff");
			},
		}

		if *stop.borrow() || self.connection.state() != (ConnectionState::Reconnecting { attempt }) {
			return;
		}

		match self.dialer.dial(self.connection.clone()).await {
			Ok(()) => {},
			Err(err) => {
				tracing::debug!(connection_id = %self.connection.id(), %err, attempt, "reconnect attempt failed");
				if let Err(transition_err) = self.connection.mark_reconnecting(attempt + 1) {
					tracing::warn!(
						connection_id = %self.connection.id(),
						err = %transition_err,
						attempt,
						"failed to advance reconnect attempt counter"
					);
				}
			},
		}
	}
}

/// Stops the background loop when dropped or when [`ReconnectHandle::stop`]
/// is called explicitly.
pub struct ReconnectHandle {
	stop: watch::Sender<bool>,
	task: tokio::task::JoinHandle<()>,
}

impl ReconnectHandle {
	pub fn stop(&self) {
		let _ = self.stop.send(true);
	}
}

impl Drop for ReconnectHandle {
	fn drop(&mut self) {
		self.task.abort();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use super::*;
	use crate::backoff::BackoffStrategy;
	use crate::connection::{ConnectionBuilder, ConnectionConfig, Endpoint, Transport};
	use crate::error::Error;
	use crate::framing::wire::BinaryProtocolAdapter;

	struct FakeTransport;

	#[async_trait]
	impl Transport for FakeTransport {
		async fn send(&self, _bytes: &[u8]) -> Result<()> {
			Ok(())
		}
		async fn close(&self) -> Result<()> {
			Ok(())
		}
	}

	/// Fails its first `fail_first_n` dials, then succeeds.
	struct FlakyDialer {
		fail_first_n: usize,
		attempts: AtomicUsize,
	}

	#[async_trait]
	impl Dialer for FlakyDialer {
		async fn dial(&self, connection: Arc<Connection>) -> Result<()> {
			let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
			if attempt < self.fail_first_n {
				return Err(Error::ConnectionRefused);
			}
			connection.attach_transport(Arc::new(FakeTransport))
		}
	}

	fn fast_policy(max_attempts: Option<u32>) -> ReconnectPolicy {
		ReconnectPolicy::new(
			BackoffStrategy::Fixed { delay: Duration::from_millis(5) },
			max_attempts,
		)
	}

	fn test_connection() -> Arc<Connection> {
		Arc::new(
			ConnectionBuilder::new()
				.endpoint(Endpoint::Tcp { host: "localhost".into(), port: 9000 })
				.adapter(Arc::new(BinaryProtocolAdapter::new()))
				.config(ConnectionConfig::default())
				.build()
				.unwrap(),
		)
	}

	#[tokio::test]
	async fn reconnects_successfully_after_a_few_failed_attempts() {
		let connection = test_connection();
		connection.begin_connecting().unwrap();
		connection.attach_transport(Arc::new(FakeTransport)).unwrap();
		connection.mark_reconnecting(1).unwrap();

		let dialer = Arc::new(FlakyDialer { fail_first_n: 2, attempts: AtomicUsize::new(0) });
		let handle =
			ReconnectLoop::spawn(connection.clone(), dialer, fast_policy(Some(10)), NetworkObserver::new());

		connection
			.subscribe_state()
			.wait_for(|state| *state == ConnectionState::Connected)
			.await
			.unwrap();
		handle.stop();
	}

	#[tokio::test]
	async fn gives_up_once_max_attempts_is_exhausted() {
		let connection = test_connection();
		connection.begin_connecting().unwrap();
		connection.attach_transport(Arc::new(FakeTransport)).unwrap();
		connection.mark_reconnecting(1).unwrap();

		let dialer = Arc::new(FlakyDialer { fail_first_n: 100, attempts: AtomicUsize::new(0) });
		let handle =
			ReconnectLoop::spawn(connection.clone(), dialer, fast_policy(Some(2)), NetworkObserver::new());

		connection
			.subscribe_state()
			.wait_for(|state| *state == ConnectionState::Disconnected)
			.await
			.unwrap();
		handle.stop();
	}

	#[tokio::test]
	async fn link_up_event_preempts_the_backoff_wait() {
		let connection = test_connection();
		connection.begin_connecting().unwrap();
		connection.attach_transport(Arc::new(FakeTransport)).unwrap();
		connection.mark_reconnecting(1).unwrap();

		let dialer = Arc::new(FlakyDialer { fail_first_n: 0, attempts: AtomicUsize::new(0) });
		let network = NetworkObserver::new();
		let policy =
			ReconnectPolicy::new(BackoffStrategy::Fixed { delay: Duration::from_secs(30) }, Some(10));
		let handle = ReconnectLoop::spawn(connection.clone(), dialer, policy, network.clone());

		// give the loop a moment to start waiting on the 30s backoff, then
		// pre-empt it; without the pre-emption this test would time out.
		tokio::time::sleep(Duration::from_millis(20)).await;
		network.emit(NetworkEvent::LinkUp);

		tokio::time::timeout(
			Duration::from_secs(2),
			connection.subscribe_state().wait_for(|state| *state == ConnectionState::Connected),
		)
		.await
		.unwrap()
		.unwrap();
		handle.stop();
	}
}
