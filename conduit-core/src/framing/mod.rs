//! C4: encode/decode messages, parse wire frames, classify incoming events.
//!
//! A [`ProtocolAdapter`] is the seam between the pipeline (C5) and the wire:
//! it never blocks and never reads beyond what its framer declares as a
//! complete frame. Two framers ship as reference implementations: a binary,
//! header-based one ([`wire::BinaryProtocolAdapter`]) and a variable-length
//! integer one modeled on MQTT's remaining-length encoding ([`varint`]).

pub mod varint;
pub mod wire;

use std::collections::HashMap;

use crate::connection::ConnectionId;
use crate::error::Result;

/// Maximum size a single logical [`Frame`] payload may have, spec default.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
	Data,
	Control,
	Heartbeat,
	Ack,
	Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
	pub compressed: bool,
	pub encrypted: bool,
	pub is_final: bool,
	pub requires_ack: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMeta {
	pub seq: Option<u64>,
	pub timestamp: Option<u64>,
	pub priority: Option<u8>,
}

/// The logical, already-framed message the pipeline/adapter work with.
#[derive(Debug, Clone)]
pub struct Frame {
	pub frame_type: FrameType,
	pub payload: Vec<u8>,
	pub flags: FrameFlags,
	pub meta: Option<FrameMeta>,
}

impl Frame {
	pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Result<Self> {
		Self::with_max(frame_type, payload, DEFAULT_MAX_FRAME_SIZE)
	}

	pub fn with_max(frame_type: FrameType, payload: Vec<u8>, max_size: usize) -> Result<Self> {
		if payload.len() > max_size {
			return Err(crate::error::Error::BufferOverflow {
				requested: payload.len(),
				capacity: max_size,
			});
		}
		Ok(Self {
			frame_type,
			payload,
			flags: FrameFlags::default(),
			meta: None,
		})
	}
}

/// A classified piece of data the adapter surfaced from the byte stream.
#[derive(Debug, Clone)]
pub enum Event {
	Response { id: u32, payload: Vec<u8> },
	Notification { event: String, payload: Vec<u8> },
	Control { kind: ControlKind, payload: Option<Vec<u8>> },
	Error { cause: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
	Heartbeat,
	Ack,
	Ping,
	Pong,
	Custom(String),
}

/// Context passed alongside an encode/decode call.
#[derive(Debug, Clone, Default)]
pub struct EncodeCtx {
	pub connection_id: Option<ConnectionId>,
	pub message_id: Option<u32>,
	pub event_name: Option<String>,
	pub compress: bool,
	pub metadata: HashMap<String, String>,
}

/// A pluggable wire-protocol. Adapters are pure with respect to the buffer:
/// `on_incoming` never consumes a partial frame and never blocks.
pub trait ProtocolAdapter: Send + Sync {
	fn encode(&self, message: &serde_json::Value, ctx: &EncodeCtx) -> Result<Vec<u8>>;
	fn decode(
		&self,
		bytes: &[u8],
		type_hint: Option<&str>,
		ctx: &EncodeCtx,
	) -> Result<serde_json::Value>;
	/// Drains as many complete frames as are currently available from
	/// `buffer`, advancing its read index only past what was consumed.
	fn on_incoming(&self, buffer: &mut crate::buffer::ReadBuffer) -> Result<Vec<Event>>;
	fn heartbeat_payload(&self) -> Option<Vec<u8>>;
	fn supports_compression(&self) -> bool;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frame_rejects_oversized_payload() {
		let payload = vec![0u8; 10];
		assert!(Frame::with_max(FrameType::Data, payload, 4).is_err());
	}
}
