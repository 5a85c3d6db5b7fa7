//! W3C `traceparent` header parsing and serialization:
//! `{version:2hex}-{trace-id:32hex}-{parent-id:16hex}-{flags:2hex}`.

use super::span::{SpanContext, SpanId, TraceId};

const SUPPORTED_VERSION: &str = "00";
const SAMPLED_FLAG: u8 = 0x01;

pub fn format_traceparent(ctx: &SpanContext) -> String {
	let flags = if ctx.sampled { SAMPLED_FLAG } else { 0 };
	format!("{}-{}-{}-{:02x}", SUPPORTED_VERSION, ctx.trace_id.to_hex(), ctx.span_id.to_hex(), flags)
}

pub fn parse_traceparent(header: &str) -> Option<SpanContext> {
	let mut parts = header.split('-');
	let version = parts.next()?;
	if version != SUPPORTED_VERSION {
		return None;
	}
	let trace_id = TraceId::from_hex(parts.next()?)?;
	let span_id = SpanId::from_hex(parts.next()?)?;
	let flags = u8::from_str_radix(parts.next()?, 16).ok()?;
	if parts.next().is_some() {
		return None;
	}
	Some(SpanContext { trace_id, span_id, sampled: flags & SAMPLED_FLAG != 0 })
}
