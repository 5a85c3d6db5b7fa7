use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub [u8; 16]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub [u8; 8]);

impl TraceId {
	pub fn random() -> Self {
		let mut bytes = [0u8; 16];
		rand::rng().fill_bytes(&mut bytes);
		Self(bytes)
	}

	pub fn to_hex(self) -> String {
		hex::encode(self.0)
	}

	pub fn from_hex(s: &str) -> Option<Self> {
		let bytes = hex::decode(s).ok()?;
		Some(Self(bytes.try_into().ok()?))
	}
}

impl SpanId {
	pub fn random() -> Self {
		let mut bytes = [0u8; 8];
		rand::rng().fill_bytes(&mut bytes);
		Self(bytes)
	}

	pub fn to_hex(self) -> String {
		hex::encode(self.0)
	}

	pub fn from_hex(s: &str) -> Option<Self> {
		let bytes = hex::decode(s).ok()?;
		Some(Self(bytes.try_into().ok()?))
	}
}

/// The propagatable identity of a span: what crosses a connection boundary
/// in a traceparent header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
	pub trace_id: TraceId,
	pub span_id: SpanId,
	pub sampled: bool,
}

/// A span: local start/end timestamps and arbitrary attributes, plus the
/// context that identifies it on the wire. Not an OpenTelemetry wrapper —
/// this crate owns the data model end to end.
#[derive(Debug, Clone)]
pub struct Span {
	pub context: SpanContext,
	pub parent_span_id: Option<SpanId>,
	pub name: String,
	pub start_unix_nanos: u128,
	pub end_unix_nanos: Option<u128>,
	pub attributes: HashMap<String, String>,
}

impl Span {
	pub fn start(name: impl Into<String>, context: SpanContext, parent_span_id: Option<SpanId>) -> Self {
		Self {
			context,
			parent_span_id,
			name: name.into(),
			start_unix_nanos: now_unix_nanos(),
			end_unix_nanos: None,
			attributes: HashMap::new(),
		}
	}

	pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.attributes.insert(key.into(), value.into());
	}

	pub fn end(&mut self) {
		if self.end_unix_nanos.is_none() {
			self.end_unix_nanos = Some(now_unix_nanos());
		}
	}

	pub fn is_ended(&self) -> bool {
		self.end_unix_nanos.is_some()
	}

	pub fn duration_nanos(&self) -> Option<u128> {
		self.end_unix_nanos.map(|end| end.saturating_sub(self.start_unix_nanos))
	}
}

fn now_unix_nanos() -> u128 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn trace_and_span_id_hex_roundtrip() {
		let trace_id = TraceId::random();
		let span_id = SpanId::random();
		assert_eq!(TraceId::from_hex(&trace_id.to_hex()), Some(trace_id));
		assert_eq!(SpanId::from_hex(&span_id.to_hex()), Some(span_id));
	}

	#[test]
	fn span_end_is_idempotent() {
		let mut span = Span::start(
			"test",
			SpanContext { trace_id: TraceId::random(), span_id: SpanId::random(), sampled: true },
			None,
		);
		span.end();
		let first_end = span.end_unix_nanos;
		span.end();
		assert_eq!(span.end_unix_nanos, first_end);
	}
}
