//! C5: the per-connection send/receive pipeline — an ordered plugin chain
//! wrapping a middleware transform chain.
//!
//! Grounded on the teacher's HTTP filter chain and retry middleware, and on
//! the general tower `Service`/`Layer` idiom for the transform half.

pub mod middleware;
pub mod plugin;

use std::sync::Arc;

use self::middleware::Middleware;
use self::plugin::{Plugin, PluginAction};
use crate::error::Result;
use crate::framing::{EncodeCtx, Frame};

/// Composes a prioritized plugin chain with a priority-ordered middleware
/// transform chain. Plugins run first (outbound) / last (inbound) relative
/// to middleware and can short-circuit the frame entirely; middleware
/// always runs if no plugin short-circuited, in descending-priority order
/// outbound and the exact reverse inbound — see [`middleware`] module docs
/// for why that ordering matters.
#[derive(Clone, Default)]
pub struct Pipeline {
	plugins: Vec<Arc<dyn Plugin>>,
	/// Stored in outbound (descending priority) order; `inbound` iterates
	/// it in reverse rather than keeping a second sorted copy.
	middleware: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
		self.plugins.push(plugin);
		self.plugins.sort_by_key(|p| p.priority());
		self
	}

	pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
		self.middleware.push(middleware);
		// Descending priority, stable within a priority so registration
		// order still breaks ties (spec §4.5: "both families run in
		// registration order within the same priority").
		self.middleware.sort_by_key(|m| std::cmp::Reverse(m.priority()));
		self
	}

	/// Runs the outbound direction: plugins' `before_send` in priority
	/// order, then the middleware chain (highest priority first), unless a
	/// plugin short-circuits — in which case `Ok(None)` is returned and the
	/// frame is not sent.
	pub async fn outbound(&self, mut frame: Frame) -> Result<Option<Frame>> {
		for plugin in &self.plugins {
			if plugin.before_send(&mut frame).await? == PluginAction::ShortCircuit {
				return Ok(None);
			}
		}
		let ctx = EncodeCtx::default();
		frame.payload = middleware::run_outgoing(&self.middleware, frame.payload, &ctx).await?;
		Ok(Some(frame))
	}

	/// Runs the inbound direction: the middleware chain in reverse
	/// (lowest priority first, undoing `outbound`'s order), then plugins'
	/// `after_receive` in priority order reversed so both families unwind
	/// symmetrically with `outbound`.
	pub async fn inbound(&self, mut frame: Frame) -> Result<Option<Frame>> {
		let ctx = EncodeCtx::default();
		let reversed: Vec<Arc<dyn Middleware>> = self.middleware.iter().rev().cloned().collect();
		frame.payload = middleware::run_incoming(&reversed, frame.payload, &ctx).await?;
		for plugin in self.plugins.iter().rev() {
			if plugin.after_receive(&mut frame).await? == PluginAction::ShortCircuit {
				return Ok(None);
			}
		}
		Ok(Some(frame))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::framing::FrameType;

	struct Blocker;

	#[async_trait::async_trait]
	impl Plugin for Blocker {
		fn name(&self) -> &str {
			"blocker"
		}

		async fn before_send(&self, _frame: &mut Frame) -> Result<PluginAction> {
			Ok(PluginAction::ShortCircuit)
		}
	}

	#[tokio::test]
	async fn plugin_short_circuit_stops_outbound() {
		let pipeline = Pipeline::new().with_plugin(Arc::new(Blocker));
		let frame = Frame::new(FrameType::Data, b"x".to_vec()).unwrap();
		assert!(pipeline.outbound(frame).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn pipeline_with_no_plugins_or_middleware_passes_through() {
		let pipeline = Pipeline::new();
		let frame = Frame::new(FrameType::Data, b"unchanged".to_vec()).unwrap();
		let out = pipeline.outbound(frame).await.unwrap().unwrap();
		assert_eq!(out.payload, b"unchanged");
	}

	struct Xor(u8, i32);

	#[async_trait::async_trait]
	impl crate::pipeline::middleware::Middleware for Xor {
		fn name(&self) -> &str {
			"xor"
		}
		fn priority(&self) -> i32 {
			self.1
		}
		async fn on_outgoing(&self, bytes: Vec<u8>, _ctx: &EncodeCtx) -> Result<Vec<u8>> {
			Ok(bytes.into_iter().map(|b| b ^ self.0).collect())
		}
		async fn on_incoming(&self, bytes: Vec<u8>, _ctx: &EncodeCtx) -> Result<Vec<u8>> {
			Ok(bytes.into_iter().map(|b| b ^ self.0).collect())
		}
	}

	/// Invariant #6 (spec §8): if every middleware is an involution, then
	/// `receive(send(m)) == m` end to end through the full pipeline,
	/// regardless of registration order, because priority reverses on the
	/// inbound path.
	#[tokio::test]
	async fn middleware_symmetry_round_trips_an_involution_chain() {
		let pipeline = Pipeline::new()
			.with_middleware(Arc::new(Xor(0x5A, 1)))
			.with_middleware(Arc::new(Xor(0x11, 10)))
			.with_middleware(Arc::new(Xor(0x03, 5)));
		let original = b"round trip me".to_vec();
		let frame = Frame::new(FrameType::Data, original.clone()).unwrap();
		let sent = pipeline.outbound(frame).await.unwrap().unwrap();
		assert_ne!(sent.payload, original);
		let received = pipeline.inbound(sent).await.unwrap().unwrap();
		assert_eq!(received.payload, original);
	}
}
