//! Build metadata for diagnostics/telemetry tagging. Grounded on the
//! teacher's `core::version::BuildInfo`, simplified to rely only on the
//! `CARGO_PKG_*` environment variables cargo sets for every crate (the
//! teacher's build-script-injected git/profile vars aren't available here
//! without carrying its build.rs along).

use std::fmt;

#[derive(Debug, Clone, serde::Serialize)]
pub struct BuildInfo {
	pub name: &'static str,
	pub version: &'static str,
	/// Set via `option_env!` so a build without it still compiles; CI can
	/// supply `CONDUIT_GIT_REVISION` to populate it.
	pub git_revision: &'static str,
}

impl BuildInfo {
	pub fn current() -> Self {
		Self {
			name: env!("CARGO_PKG_NAME"),
			version: env!("CARGO_PKG_VERSION"),
			git_revision: option_env!("CONDUIT_GIT_REVISION").unwrap_or("unknown"),
		}
	}
}

impl Default for BuildInfo {
	fn default() -> Self {
		Self::current()
	}
}

impl fmt::Display for BuildInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {} ({})", self.name, self.version, self.git_revision)
	}
}
