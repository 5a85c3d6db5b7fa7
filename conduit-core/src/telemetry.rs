//! Logging/tracing setup: a `tracing-subscriber` `fmt` layer filtered by
//! `RUST_LOG`, installed once. Independent of the C12 span/propagation data
//! model in [`crate::trace`] — this is the human-facing log stream, the
//! teacher keeps the two concerns separate too.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";

/// Installs the global `tracing` subscriber. Safe to call more than once
/// (and from more than one test in the same process) — every call after
/// the first is a no-op.
pub fn init() {
	INIT.get_or_init(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_span_events(FmtSpan::CLOSE)
			.with_target(true)
			.try_init()
			.ok();
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn init_is_idempotent() {
		init();
		init();
	}
}
