//! conduit-core: connection lifecycle, data-plane pipeline, buffering
//! substrate, and generic resource pool for multi-protocol client
//! connections, plus the rate-limiting, tracing, and metrics subsystems
//! that sit alongside them.
//!
//! Concrete transports (TCP, etc.) live in separate crates that implement
//! [`connection::Transport`]; this crate owns everything above the wire.

pub mod backoff;
pub mod buffer;
pub mod buffer_pool;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod framing;
pub mod metrics;
pub mod network;
pub mod pipeline;
pub mod pool;
pub mod ratelimit;
pub mod reconnect;
pub mod state;
pub mod telemetry;
pub mod trace;
pub mod version;
pub mod zerocopy;

pub use backoff::{BackoffStrategy, ReconnectPolicy};
pub use buffer::ReadBuffer;
pub use buffer_pool::{BufferPool, BufferPoolConfig, PooledBuffer};
pub use config::{ClientConfig, MonitoringConfig, ProxyConfig, RateLimitConfig, TlsConfig};
pub use connection::{Connection, ConnectionBuilder, ConnectionConfig, ConnectionId, Endpoint, Transport};
pub use correlator::Correlator;
pub use error::{Error, Result, TimeoutScope};
pub use pipeline::Pipeline;
pub use pool::{Pool, PoolConfig, PoolFactory, Poolable, PooledConnection, SelectionStrategy};
pub use reconnect::{Dialer, ReconnectHandle, ReconnectLoop};
pub use state::{ConnectionState, StateMachine};
pub use version::BuildInfo;
