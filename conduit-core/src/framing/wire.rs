//! Reference binary framer: a fixed 24-byte header plus body, preceded on
//! the wire by a duplicated 4-byte length prefix so a reader can skip an
//! unparsable frame without first understanding its header.
//!
//! ```text
//! | 4B length prefix | 4B length-inclusive-of-header | 2B 0x7A5A | 2B version |
//! | 1B type-flags    | 1B response-flag | 4B request-id | 4B function-id      |
//! | 4B response-code | 2B reserved | body ...                                 |
//! ```
//!
//! The 4-byte prefix and the header's own length field carry the same
//! value; only the header (24 bytes) is counted in `total_length`.

use std::sync::atomic::{AtomicU32, Ordering};

use byteorder::{BigEndian, ByteOrder};

use super::{ControlKind, EncodeCtx, Event, ProtocolAdapter};
use crate::buffer::ReadBuffer;
use crate::error::{Error, Result};

pub const WIRE_TAG: u16 = 0x7A5A;
pub const HEADER_LEN: usize = 24;
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Reserved `function_id` marking a control heartbeat frame. Classification
/// of heartbeats always goes through this explicit tag comparison, never a
/// payload-prefix match (see DESIGN.md).
pub const HEARTBEAT_FUNCTION_ID: u32 = 0xFFFF;

/// Bit0 of the type-flags byte: "idle/heartbeat" per spec §6. Classification
/// never reads this bit back (see [`WireHeader::is_heartbeat`]'s doc and
/// DESIGN.md's resolution of the prefix-equality bug) — it's emitted purely
/// so the on-wire frame matches the §6 contract for any other reader that
/// does key off it.
const TYPE_FLAG_IDLE: u8 = 0b0000_0001;
const TYPE_FLAG_COMPRESSED: u8 = 0b0010_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
	pub total_length: u32,
	pub tag: u16,
	pub version: u16,
	pub compressed: bool,
	pub is_response: bool,
	pub request_id: u32,
	pub function_id: u32,
	pub response_code: u32,
}

impl WireHeader {
	pub fn body_len(&self) -> usize {
		self.total_length as usize - HEADER_LEN
	}

	fn encode(&self) -> [u8; HEADER_LEN] {
		let mut buf = [0u8; HEADER_LEN];
		BigEndian::write_u32(&mut buf[0..4], self.total_length);
		BigEndian::write_u16(&mut buf[4..6], self.tag);
		BigEndian::write_u16(&mut buf[6..8], self.version);
		let mut type_flags = if self.compressed { TYPE_FLAG_COMPRESSED } else { 0 };
		if self.is_heartbeat() {
			type_flags |= TYPE_FLAG_IDLE;
		}
		buf[8] = type_flags;
		buf[9] = if self.is_response { 1 } else { 0 };
		BigEndian::write_u32(&mut buf[10..14], self.request_id);
		BigEndian::write_u32(&mut buf[14..18], self.function_id);
		BigEndian::write_u32(&mut buf[18..22], self.response_code);
		// bytes 22..24 reserved, left zeroed
		buf
	}

	fn decode(raw: &[u8]) -> Result<Self> {
		if raw.len() != HEADER_LEN {
			return Err(Error::InvalidFrame {
				reason: format!("wire header must be {HEADER_LEN} bytes, got {}", raw.len()),
			});
		}
		let tag = BigEndian::read_u16(&raw[4..6]);
		if tag != WIRE_TAG {
			return Err(Error::ProtocolViolation {
				expected: format!("tag 0x{WIRE_TAG:04X}, got 0x{tag:04X}"),
			});
		}
		Ok(Self {
			total_length: BigEndian::read_u32(&raw[0..4]),
			tag,
			version: BigEndian::read_u16(&raw[6..8]),
			compressed: raw[8] & TYPE_FLAG_COMPRESSED != 0,
			is_response: raw[9] != 0,
			request_id: BigEndian::read_u32(&raw[10..14]),
			function_id: BigEndian::read_u32(&raw[14..18]),
			response_code: BigEndian::read_u32(&raw[18..22]),
		})
	}

	/// `true` when `function_id` is the reserved heartbeat tag. Per
	/// DESIGN.md's resolution of the spec's open question, classification
	/// always keys off this tag, never the type-flags idle bit or a payload
	/// prefix — the bit is still set on encode so the wire bytes themselves
	/// satisfy spec §6's contract.
	pub fn is_heartbeat(&self) -> bool {
		self.function_id == HEARTBEAT_FUNCTION_ID
	}
}

/// A single parsed frame: the header plus its body, still owned bytes.
#[derive(Debug, Clone)]
pub struct RawFrame {
	pub header: WireHeader,
	pub body: Vec<u8>,
}

/// Pulls complete `(header, body)` pairs out of a [`ReadBuffer`], leaving a
/// trailing partial frame untouched for the next `append`.
#[derive(Debug, Default)]
pub struct BinaryFramer {
	next_request_id: AtomicU32,
}

impl BinaryFramer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Monotone request-id allocator, wrapping at `u32::MAX` and skipping the
	/// reserved values `0` and `0xFFFF` (mirrors the correlator's scheme so
	/// ids the framer assigns never collide with its own heartbeat tag).
	pub fn next_request_id(&self) -> u32 {
		loop {
			let id = self.next_request_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
			if id != 0 && id != HEARTBEAT_FUNCTION_ID {
				return id;
			}
		}
	}

	/// Parses one frame at `buffer`'s read index. Returns `Ok(None)` (buffer
	/// untouched) when fewer bytes are available than the frame declares.
	pub fn try_parse(&self, buffer: &mut ReadBuffer) -> Result<Option<RawFrame>> {
		let Some(prefix) = buffer.peek(LENGTH_PREFIX_LEN) else {
			return Ok(None);
		};
		let declared_len = BigEndian::read_u32(&prefix) as usize;
		if buffer.available() < LENGTH_PREFIX_LEN + declared_len {
			return Ok(None);
		}
		if declared_len < HEADER_LEN {
			return Err(Error::InvalidFrame {
				reason: format!("declared length {declared_len} shorter than header"),
			});
		}
		// Buffer now provably holds the whole frame; consume for real.
		buffer.skip(LENGTH_PREFIX_LEN);
		let header_bytes = buffer.read(HEADER_LEN).expect("checked above");
		let header = WireHeader::decode(&header_bytes)?;
		let body = buffer.read(header.body_len()).expect("checked above");
		Ok(Some(RawFrame { header, body }))
	}

	pub fn encode(&self, header: WireHeader, body: &[u8]) -> Vec<u8> {
		let total_length = (HEADER_LEN + body.len()) as u32;
		let header = WireHeader { total_length, ..header };
		let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + HEADER_LEN + body.len());
		let mut prefix = [0u8; 4];
		BigEndian::write_u32(&mut prefix, total_length);
		out.extend_from_slice(&prefix);
		out.extend_from_slice(&header.encode());
		out.extend_from_slice(body);
		out
	}
}

/// [`ProtocolAdapter`] built on [`BinaryFramer`], speaking `serde_json`
/// values as its message representation.
#[derive(Debug, Default)]
pub struct BinaryProtocolAdapter {
	framer: BinaryFramer,
}

impl BinaryProtocolAdapter {
	pub fn new() -> Self {
		Self::default()
	}
}

impl ProtocolAdapter for BinaryProtocolAdapter {
	fn encode(&self, message: &serde_json::Value, ctx: &EncodeCtx) -> Result<Vec<u8>> {
		let body = serde_json::to_vec(message).map_err(|e| Error::EncodingFailed(e.to_string()))?;
		let request_id = ctx.message_id.unwrap_or_else(|| self.framer.next_request_id());
		let function_id = ctx
			.event_name
			.as_ref()
			.and_then(|n| n.parse::<u32>().ok())
			.unwrap_or(0);
		let header = WireHeader {
			total_length: 0, // filled in by encode()
			tag: WIRE_TAG,
			version: 1,
			compressed: ctx.compress,
			is_response: false,
			request_id,
			function_id,
			response_code: 0,
		};
		Ok(self.framer.encode(header, &body))
	}

	fn decode(&self, bytes: &[u8], _type_hint: Option<&str>, _ctx: &EncodeCtx) -> Result<serde_json::Value> {
		serde_json::from_slice(bytes).map_err(|e| Error::DecodingFailed(e.to_string()))
	}

	fn on_incoming(&self, buffer: &mut ReadBuffer) -> Result<Vec<Event>> {
		let mut events = Vec::new();
		while let Some(frame) = self.framer.try_parse(buffer)? {
			let header = frame.header;
			let event = if header.is_heartbeat() {
				Event::Control { kind: ControlKind::Heartbeat, payload: None }
			} else if header.is_response {
				Event::Response { id: header.request_id, payload: frame.body }
			} else {
				Event::Notification {
					event: header.function_id.to_string(),
					payload: frame.body,
				}
			};
			events.push(event);
		}
		Ok(events)
	}

	fn heartbeat_payload(&self) -> Option<Vec<u8>> {
		self.heartbeat_frame()
	}

	fn supports_compression(&self) -> bool {
		true
	}
}

impl BinaryProtocolAdapter {
	/// Builds a wire frame carrying `body` as the response to `request_id`.
	/// Exposed for transports and tests that need to construct a response
	/// frame directly rather than going through [`ProtocolAdapter::encode`]
	/// (which always builds a request, never a response).
	pub fn encode_response(&self, request_id: u32, body: &[u8]) -> Vec<u8> {
		let header = WireHeader {
			total_length: 0,
			tag: WIRE_TAG,
			version: 1,
			compressed: false,
			is_response: true,
			request_id,
			function_id: 0,
			response_code: 0,
		};
		self.framer.encode(header, body)
	}

	/// Builds a wire frame carrying a server-pushed notification. `event` is
	/// encoded into `function_id` when it parses as an integer (mirroring
	/// how [`ProtocolAdapter::encode`] reads `EncodeCtx::event_name`); frames
	/// with a non-numeric event name still roundtrip, just classified under
	/// `function_id` 0 and named here only for the test's own bookkeeping.
	pub fn encode_notification(&self, event: &str, body: Vec<u8>) -> Vec<u8> {
		let function_id = event.parse::<u32>().unwrap_or(0);
		let header = WireHeader {
			total_length: 0,
			tag: WIRE_TAG,
			version: 1,
			compressed: false,
			is_response: false,
			request_id: 0,
			function_id,
			response_code: 0,
		};
		self.framer.encode(header, &body)
	}

	fn heartbeat_frame(&self) -> Option<Vec<u8>> {
		let header = WireHeader {
			total_length: 0,
			tag: WIRE_TAG,
			version: 1,
			compressed: false,
			is_response: false,
			request_id: 0,
			function_id: HEARTBEAT_FUNCTION_ID,
			response_code: 0,
		};
		Some(self.framer.encode(header, &[]))
	}
}
