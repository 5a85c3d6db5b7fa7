//! The configuration surface enumerated in spec §6, as plain
//! `serde`-derived data: `ConnectionConfig` (in [`crate::connection`]),
//! [`crate::pool::PoolConfig`], and [`crate::buffer_pool::BufferPoolConfig`]
//! each own their corner; this module holds the remaining pieces
//! (TLS/proxy knobs, rate-limit algorithm selection, monitoring) plus
//! [`ClientConfig`], the top-level bag a `serde_yaml`/`serde_json` file
//! deserializes into.
//!
//! Per spec.md §1's Non-goals (no TLS stack, no server acceptor), `TlsConfig`
//! and `ProxyConfig` are inert data — carrying the knobs a transport crate
//! (e.g. `conduit-tcp`) would read to build a real `rustls`/proxy dial, not
//! an implementation of either.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer_pool::BufferPoolConfig;
use crate::connection::ConnectionConfig;
use crate::pool::PoolConfig;
use crate::ratelimit::{FixedWindow, LeakyBucket, RateLimiter, SlidingWindow, TokenBucket};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
	pub enabled: bool,
	pub ca_path: Option<String>,
	pub cert_path: Option<String>,
	pub key_path: Option<String>,
	pub verify_hostname: bool,
}

impl Default for TlsConfig {
	fn default() -> Self {
		Self { enabled: false, ca_path: None, cert_path: None, key_path: None, verify_hostname: true }
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
	pub url: Option<String>,
	pub username: Option<String>,
	pub password: Option<String>,
}

impl Default for ProxyConfig {
	fn default() -> Self {
		Self { url: None, username: None, password: None }
	}
}

/// Picks which C11 algorithm backs a `RateLimitConfig` direction, with the
/// parameters each constructor needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
	TokenBucket { capacity: u32, rate: u32, per: Duration },
	LeakyBucket { capacity: u32, drain_period: Duration },
	FixedWindow { limit: u32, window: Duration },
	SlidingWindow { limit: u32, window: Duration },
}

impl RateLimitAlgorithm {
	pub fn build(&self) -> Arc<dyn RateLimiter> {
		match *self {
			RateLimitAlgorithm::TokenBucket { capacity, rate, per } => Arc::new(TokenBucket::new(capacity, rate, per)),
			RateLimitAlgorithm::LeakyBucket { capacity, drain_period } => {
				Arc::new(LeakyBucket::new(capacity, drain_period))
			},
			RateLimitAlgorithm::FixedWindow { limit, window } => Arc::new(FixedWindow::new(limit, window)),
			RateLimitAlgorithm::SlidingWindow { limit, window } => Arc::new(SlidingWindow::new(limit, window)),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
	pub limit_outgoing: Option<RateLimitAlgorithm>,
	pub limit_incoming: Option<RateLimitAlgorithm>,
	pub acquire_timeout: Duration,
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		Self { limit_outgoing: None, limit_incoming: None, acquire_timeout: Duration::from_secs(5) }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringBudget {
	pub cpu_percent: Option<f64>,
	pub memory_bytes: Option<u64>,
	pub latency_overhead: Option<Duration>,
}

impl Default for MonitoringBudget {
	fn default() -> Self {
		Self { cpu_percent: None, memory_bytes: None, latency_overhead: None }
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
	pub enabled: bool,
	pub sampling_rate: f64,
	pub collection_interval: Duration,
	pub retention: Duration,
	pub enabled_categories: Vec<String>,
	pub exporters: Vec<String>,
	pub budget: MonitoringBudget,
}

impl Default for MonitoringConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			sampling_rate: 1.0,
			collection_interval: Duration::from_secs(10),
			retention: Duration::from_secs(3600),
			enabled_categories: Vec::new(),
			exporters: Vec::new(),
			budget: MonitoringBudget::default(),
		}
	}
}

/// The top-level bag a config file (`serde_yaml`/`serde_json`) deserializes
/// into — everything a `conduit-cli`-style binary needs to build a
/// connection, a pool, and the ambient subsystems around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	pub connection: ConnectionConfig,
	pub pool: PoolConfig,
	pub buffer_pool: BufferPoolConfig,
	pub rate_limit: RateLimitConfig,
	pub monitoring: MonitoringConfig,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			connection: ConnectionConfig::default(),
			pool: PoolConfig::default(),
			buffer_pool: BufferPoolConfig::default(),
			rate_limit: RateLimitConfig::default(),
			monitoring: MonitoringConfig::default(),
		}
	}
}

impl ClientConfig {
	pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
		serde_yaml::from_str(s)
	}

	pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(s)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_client_config_round_trips_through_yaml() {
		let config = ClientConfig::default();
		let yaml = serde_yaml::to_string(&config).unwrap();
		let parsed = ClientConfig::from_yaml(&yaml).unwrap();
		assert_eq!(parsed.pool.max, config.pool.max);
	}

	#[test]
	fn rate_limit_algorithm_parses_from_yaml() {
		let yaml = "algorithm: token_bucket\ncapacity: 100\nrate: 10\nper:\n  secs: 1\n  nanos: 0\n";
		let algo: RateLimitAlgorithm = serde_yaml::from_str(yaml).unwrap();
		assert!(matches!(algo, RateLimitAlgorithm::TokenBucket { capacity: 100, rate: 10, .. }));
	}
}
