//! Error taxonomy for the connection engine (spec §7).
//!
//! One variant per error *kind*, not per call site. Callers match on kind,
//! not on the message text.

use std::time::Duration;

use thiserror::Error;

/// Which operation a [`Error::Timeout`] happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutScope {
	Connect,
	Read,
	Write,
	Request,
	Acquire,
}

impl std::fmt::Display for TimeoutScope {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			TimeoutScope::Connect => "connect",
			TimeoutScope::Read => "read",
			TimeoutScope::Write => "write",
			TimeoutScope::Request => "request",
			TimeoutScope::Acquire => "acquire",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Error)]
pub enum Error {
	#[error("connection refused")]
	ConnectionRefused,

	#[error("not connected")]
	NotConnected,

	#[error("invalid state transition from {from:?} to {to:?}")]
	InvalidStateTransition {
		from: crate::state::ConnectionState,
		to: crate::state::ConnectionState,
	},

	#[error("timeout in {scope}")]
	Timeout { scope: TimeoutScope },

	#[error("buffer overflow: requested {requested}, capacity {capacity}")]
	BufferOverflow { requested: usize, capacity: usize },

	#[error("invalid frame: {reason}")]
	InvalidFrame { reason: String },

	#[error("protocol violation: expected {expected}")]
	ProtocolViolation { expected: String },

	#[error("encoding failed: {0}")]
	EncodingFailed(String),

	#[error("decoding failed: {0}")]
	DecodingFailed(String),

	#[error("authentication failed")]
	AuthenticationFailed,

	#[error("tls error: {reason}")]
	TlsError { reason: String },

	#[error("proxy error: {reason}")]
	ProxyError { reason: String },

	#[error("rate limited{}", retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
	RateLimited { retry_after: Option<Duration> },

	#[error("pool exhausted")]
	PoolExhausted,

	#[error("pool draining")]
	PoolDraining,

	#[error("pool closed")]
	PoolClosed,

	#[error("cancelled")]
	Cancelled,

	#[error("connection closed")]
	ConnectionClosed,

	#[error("network unreachable")]
	NetworkUnreachable,

	#[error("invalid endpoint: {0}")]
	InvalidEndpoint(String),

	#[error("resource exhausted: {0}")]
	ResourceExhausted(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
