//! C12: a self-owned tracing data model — spans, W3C propagation, and
//! sampling — independent of any OpenTelemetry wiring.

pub mod propagation;
pub mod sampler;
pub mod span;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

pub use propagation::{format_traceparent, parse_traceparent};
pub use sampler::{AlwaysOff, AlwaysOn, Probability, RandomProbability, Sampler};
pub use span::{Span, SpanContext, SpanId, TraceId};

const DEFAULT_RETAINED_SPANS: usize = 1024;

/// Starts spans (consulting a [`Sampler`] for the root decision) and
/// retains a bounded ring of ended spans for inspection/export.
pub struct Tracer {
	sampler: Arc<dyn Sampler>,
	retained: Mutex<VecDeque<Span>>,
	max_retained: usize,
}

impl Tracer {
	pub fn new(sampler: Arc<dyn Sampler>) -> Self {
		Self::with_retention(sampler, DEFAULT_RETAINED_SPANS)
	}

	pub fn with_retention(sampler: Arc<dyn Sampler>, max_retained: usize) -> Self {
		Self { sampler, retained: Mutex::new(VecDeque::new()), max_retained }
	}

	/// Starts a root span with a fresh trace id, deciding sampling via the
	/// configured [`Sampler`].
	pub fn start_root(&self, name: impl Into<String>) -> Span {
		let trace_id = TraceId::random();
		let sampled = self.sampler.should_sample(trace_id);
		let context = SpanContext { trace_id, span_id: SpanId::random(), sampled };
		Span::start(name, context, None)
	}

	/// Starts a child span inheriting the parent's trace id and sampling
	/// decision.
	pub fn start_child(&self, name: impl Into<String>, parent: &SpanContext) -> Span {
		let context = SpanContext { trace_id: parent.trace_id, span_id: SpanId::random(), sampled: parent.sampled };
		Span::start(name, context, Some(parent.span_id))
	}

	/// Ends `span` and, if it was sampled, retains it (evicting the oldest
	/// retained span once at capacity — a ring buffer, not an unbounded
	/// log).
	pub fn end(&self, mut span: Span) {
		span.end();
		if !span.context.sampled {
			return;
		}
		let mut retained = self.retained.lock();
		if retained.len() >= self.max_retained {
			retained.pop_front();
		}
		retained.push_back(span);
	}

	pub fn retained_spans(&self) -> Vec<Span> {
		self.retained.lock().iter().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unsampled_spans_are_not_retained() {
		let tracer = Tracer::new(Arc::new(AlwaysOff));
		let span = tracer.start_root("op");
		tracer.end(span);
		assert!(tracer.retained_spans().is_empty());
	}

	#[test]
	fn sampled_spans_are_retained_and_bounded() {
		let tracer = Tracer::with_retention(Arc::new(AlwaysOn), 2);
		for i in 0..5 {
			let span = tracer.start_root(format!("op-{i}"));
			tracer.end(span);
		}
		let retained = tracer.retained_spans();
		assert_eq!(retained.len(), 2);
		assert_eq!(retained[0].name, "op-3");
		assert_eq!(retained[1].name, "op-4");
	}

	#[test]
	fn child_span_inherits_trace_id_and_sampling() {
		let tracer = Tracer::new(Arc::new(AlwaysOn));
		let root = tracer.start_root("root");
		let child = tracer.start_child("child", &root.context);
		assert_eq!(child.context.trace_id, root.context.trace_id);
		assert_eq!(child.parent_span_id, Some(root.context.span_id));
		assert_eq!(child.context.sampled, root.context.sampled);
	}
}
