//! Middleware: fine-grained, per-message byte transforms ordered by a
//! stable integer priority (spec §4.5). Unlike [`super::plugin::Plugin`],
//! middleware never sees a structured [`Frame`] — only the raw bytes and
//! the per-message [`EncodeCtx`] — and composes as a flat, ordered list
//! rather than a tower-style continuation chain, since the ordering
//! itself (not early return) is what each link needs to cooperate on:
//! higher priority runs first going out, and the same chain unwinds in
//! reverse coming back in, so a compress(prio 10) -> encrypt(prio 5)
//! outgoing pair decodes as decrypt -> decompress incoming automatically.

use async_trait::async_trait;

use crate::error::Result;
use crate::framing::EncodeCtx;

#[async_trait]
pub trait Middleware: Send + Sync {
	fn name(&self) -> &str;

	/// Higher runs first on the outgoing path; the same ordering is
	/// reversed for incoming, so symmetric pairs (compress/decompress,
	/// encrypt/decrypt) undo each other correctly regardless of how many
	/// other middlewares sit between them.
	fn priority(&self) -> i32 {
		0
	}

	async fn on_outgoing(&self, bytes: Vec<u8>, ctx: &EncodeCtx) -> Result<Vec<u8>>;
	async fn on_incoming(&self, bytes: Vec<u8>, ctx: &EncodeCtx) -> Result<Vec<u8>>;
}

/// Runs `middlewares` (already sorted in the caller's desired order) over
/// `bytes` in sequence. A failure at step `k` aborts immediately — steps
/// `0..k` that already ran are not undone, per spec §4.5's "atomic with
/// respect to its own ordering" rule.
pub async fn run_outgoing(middlewares: &[std::sync::Arc<dyn Middleware>], mut bytes: Vec<u8>, ctx: &EncodeCtx) -> Result<Vec<u8>> {
	for mw in middlewares {
		bytes = mw.on_outgoing(bytes, ctx).await?;
	}
	Ok(bytes)
}

pub async fn run_incoming(middlewares: &[std::sync::Arc<dyn Middleware>], mut bytes: Vec<u8>, ctx: &EncodeCtx) -> Result<Vec<u8>> {
	for mw in middlewares {
		bytes = mw.on_incoming(bytes, ctx).await?;
	}
	Ok(bytes)
}
