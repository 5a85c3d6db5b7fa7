use rand::Rng;

use super::span::TraceId;

pub trait Sampler: Send + Sync {
	fn should_sample(&self, trace_id: TraceId) -> bool;
}

pub struct AlwaysOn;
impl Sampler for AlwaysOn {
	fn should_sample(&self, _trace_id: TraceId) -> bool {
		true
	}
}

pub struct AlwaysOff;
impl Sampler for AlwaysOff {
	fn should_sample(&self, _trace_id: TraceId) -> bool {
		false
	}
}

/// Samples a fixed fraction of traces, decided by the trace id itself so
/// every span within one trace agrees on the decision.
pub struct Probability {
	ratio: f64,
}

impl Probability {
	/// `ratio` is clamped to `[0.0, 1.0]`.
	pub fn new(ratio: f64) -> Self {
		Self { ratio: ratio.clamp(0.0, 1.0) }
	}
}

impl Sampler for Probability {
	fn should_sample(&self, trace_id: TraceId) -> bool {
		if self.ratio >= 1.0 {
			return true;
		}
		if self.ratio <= 0.0 {
			return false;
		}
		// Derive a stable [0, 1) value from the trace id's low bits so the
		// decision is deterministic per trace, not per call.
		let mut low_bytes = [0u8; 8];
		low_bytes.copy_from_slice(&trace_id.0[8..16]);
		let as_fraction = u64::from_be_bytes(low_bytes) as f64 / u64::MAX as f64;
		as_fraction < self.ratio
	}
}

/// A sampler driven purely by `rand`, for callers that want per-call
/// randomness rather than per-trace determinism.
pub struct RandomProbability {
	ratio: f64,
}

impl RandomProbability {
	pub fn new(ratio: f64) -> Self {
		Self { ratio: ratio.clamp(0.0, 1.0) }
	}
}

impl Sampler for RandomProbability {
	fn should_sample(&self, _trace_id: TraceId) -> bool {
		rand::rng().random::<f64>() < self.ratio
	}
}
