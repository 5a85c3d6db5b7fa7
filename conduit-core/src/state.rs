//! C7: connection state machine and the broadcast channel announcing its
//! transitions.
//!
//! Grounded on the teacher's drain watch-channel idiom: a `watch::Sender`
//! holds the latest state, and any number of cheap `watch::Receiver` clones
//! observe transitions without a mailbox per-subscriber.

use tokio::sync::watch;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Connected,
	Reconnecting { attempt: u32 },
	Disconnecting,
}

impl ConnectionState {
	/// Whether `self -> next` is a legal transition per the state diagram.
	pub fn can_transition_to(self, next: ConnectionState) -> bool {
		use ConnectionState::*;
		matches!(
			(self, next),
			(Disconnected, Connecting)
				| (Connecting, Connected)
				| (Connecting, Disconnected)
				| (Connecting, Reconnecting { .. })
				| (Connected, Disconnecting)
				| (Connected, Reconnecting { .. })
				| (Connected, Disconnected)
				| (Reconnecting { .. }, Connecting)
				| (Reconnecting { .. }, Connected)
				| (Reconnecting { .. }, Reconnecting { .. })
				| (Reconnecting { .. }, Disconnected)
				| (Disconnecting, Disconnected)
		)
	}

	pub fn is_terminal_for_reconnect(self) -> bool {
		matches!(self, ConnectionState::Disconnecting)
	}
}

/// Owns the authoritative current [`ConnectionState`] and broadcasts every
/// transition. Cloning a [`StateMachine`] clones the `Arc`-backed channel
/// handles, not the state itself — all clones observe the same machine.
#[derive(Debug, Clone)]
pub struct StateMachine {
	tx: watch::Sender<ConnectionState>,
}

impl StateMachine {
	pub fn new() -> Self {
		let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
		Self { tx }
	}

	pub fn current(&self) -> ConnectionState {
		*self.tx.borrow()
	}

	pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
		self.tx.subscribe()
	}

	/// Attempts the transition, rejecting it with
	/// [`Error::InvalidStateTransition`] if illegal per
	/// [`ConnectionState::can_transition_to`].
	pub fn transition(&self, next: ConnectionState) -> Result<()> {
		let current = self.current();
		if !current.can_transition_to(next) {
			return Err(Error::InvalidStateTransition { from: current, to: next });
		}
		self.tx.send_replace(next);
		Ok(())
	}

	/// Blocks until the state satisfies `predicate`, or the channel closes.
	pub async fn wait_for(&self, mut predicate: impl FnMut(ConnectionState) -> bool) -> Result<ConnectionState> {
		let mut rx = self.subscribe();
		if predicate(*rx.borrow()) {
			return Ok(*rx.borrow());
		}
		loop {
			rx.changed().await.map_err(|_| Error::ConnectionClosed)?;
			let state = *rx.borrow();
			if predicate(state) {
				return Ok(state);
			}
		}
	}
}

impl Default for StateMachine {
	fn default() -> Self {
		Self::new()
	}
}
