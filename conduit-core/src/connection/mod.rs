//! Glue: wires the state machine (C7), pipeline (C5), correlator (C6), and
//! a pluggable [`Transport`] into one request/response-capable connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::buffer::ReadBuffer;
use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::framing::{ControlKind, EncodeCtx, Event, Frame, FrameType, ProtocolAdapter};
use crate::pipeline::Pipeline;
use crate::pool::Poolable;
use crate::state::{ConnectionState, StateMachine};

/// An inbound message surfaced to subscribers that isn't a response to any
/// request this connection sent — the fan-out point for server-pushed
/// events.
#[derive(Debug, Clone)]
pub struct Notification {
	pub event: String,
	pub payload: Vec<u8>,
}

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for ConnectionId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Where a connection points. A tagged union rather than a plain string so
/// the transport layer can match on variant instead of re-parsing an
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
	Tcp { host: String, port: u16 },
	Unix { path: String },
	Url { url: String },
}

impl std::fmt::Display for Endpoint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
			Endpoint::Unix { path } => write!(f, "unix://{path}"),
			Endpoint::Url { url } => write!(f, "{url}"),
		}
	}
}

/// What a concrete wire (conduit-tcp, or any other carrier) must provide a
/// [`Connection`] to actually move bytes and tear itself down.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send(&self, bytes: &[u8]) -> Result<()>;
	async fn close(&self) -> Result<()>;
}

/// The connection-builder configuration surface (spec §6): `{endpoint,
/// timeout, heartbeat_interval, heartbeat_timeout, reconnection_strategy,
/// tls, proxy, middlewares, plugins, id}`. `middlewares`/`plugins` are
/// trait-object chains wired programmatically through [`Pipeline`], not
/// deserialized — everything else here is plain config data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	pub request_timeout: Duration,
	pub heartbeat_interval: Option<Duration>,
	pub heartbeat_timeout: Duration,
	pub reconnect: crate::backoff::ReconnectPolicy,
	pub tls: Option<crate::config::TlsConfig>,
	pub proxy: Option<crate::config::ProxyConfig>,
	/// User-supplied label for diagnostics, distinct from the generated
	/// [`ConnectionId`].
	pub label: Option<String>,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(30),
			heartbeat_interval: Some(Duration::from_secs(30)),
			heartbeat_timeout: Duration::from_secs(10),
			reconnect: crate::backoff::ReconnectPolicy::default(),
			tls: None,
			proxy: None,
			label: None,
		}
	}
}

/// A request/response-capable endpoint: wires together the state machine,
/// pipeline, correlator, and protocol adapter around a [`Transport`]
/// supplied once connecting succeeds.
pub struct Connection {
	id: ConnectionId,
	endpoint: Endpoint,
	state: StateMachine,
	correlator: Arc<Correlator>,
	pipeline: Arc<Pipeline>,
	adapter: Arc<dyn ProtocolAdapter>,
	transport: Mutex<Option<Arc<dyn Transport>>>,
	config: ConnectionConfig,
	read_buffer: Mutex<ReadBuffer>,
	notifications: broadcast::Sender<Notification>,
}

impl Connection {
	pub fn new(
		endpoint: Endpoint,
		adapter: Arc<dyn ProtocolAdapter>,
		pipeline: Arc<Pipeline>,
		config: ConnectionConfig,
	) -> Self {
		let (notifications, _rx) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
		Self {
			id: ConnectionId::new(),
			endpoint,
			state: StateMachine::new(),
			correlator: Arc::new(Correlator::new()),
			pipeline,
			adapter,
			transport: Mutex::new(None),
			config,
			read_buffer: Mutex::new(ReadBuffer::with_defaults()),
			notifications,
		}
	}

	/// A stream of server-pushed events this connection didn't explicitly
	/// request, from this point forward.
	pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
		self.notifications.subscribe()
	}

	pub fn id(&self) -> ConnectionId {
		self.id
	}

	pub fn endpoint(&self) -> &Endpoint {
		&self.endpoint
	}

	pub fn state(&self) -> ConnectionState {
		self.state.current()
	}

	pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
		self.state.subscribe()
	}

	pub fn correlator(&self) -> &Arc<Correlator> {
		&self.correlator
	}

	/// Marks the connection `Connecting`, then `Connected` once a transport
	/// is handed over by whoever dialed it.
	pub fn begin_connecting(&self) -> Result<()> {
		self.state.transition(ConnectionState::Connecting)
	}

	pub fn attach_transport(&self, transport: Arc<dyn Transport>) -> Result<()> {
		self.state.transition(ConnectionState::Connected)?;
		*self.transport.lock() = Some(transport);
		Ok(())
	}

	/// Called after the read loop observes the link drop (or a redial
	/// attempt fails). Reconnection itself (C8 backoff, C9 network
	/// awareness) is driven by the owner of this connection — typically a
	/// [`crate::reconnect::ReconnectLoop`] — not by the connection itself;
	/// this only records the state transition and, per spec §7 ("I/O errors
	/// on read/write ... all pending requests fail with `ConnectionClosed`"),
	/// fails every request still waiting on the transport that just died.
	pub fn mark_reconnecting(&self, attempt: u32) -> Result<()> {
		self.state.transition(ConnectionState::Reconnecting { attempt })?;
		self.correlator.fail_all(|| Error::ConnectionClosed);
		*self.transport.lock() = None;
		Ok(())
	}

	/// Called by the reconnect loop when the backoff policy's
	/// `max_attempts` has been exhausted: settles the connection into its
	/// one fully-released terminal state instead of retrying forever.
	pub fn give_up_reconnecting(&self) -> Result<()> {
		self.state.transition(ConnectionState::Disconnected)
	}

	/// Delivers a raw inbound payload already classified as a response to
	/// the waiting caller, if any.
	pub fn deliver_response(&self, id: u32, payload: Vec<u8>) -> bool {
		self.correlator.resolve(id, payload)
	}

	/// Encodes `message`, runs it through the outbound pipeline, and hands
	/// the resulting bytes to the transport, then awaits the matching
	/// response by id.
	pub async fn send_request(&self, message: &serde_json::Value) -> Result<serde_json::Value> {
		if self.state() != ConnectionState::Connected {
			return Err(Error::NotConnected);
		}
		let (id, rx) = self.correlator.begin()?;
		let ctx = EncodeCtx { message_id: Some(id), connection_id: Some(self.id), ..Default::default() };
		let encoded = self.adapter.encode(message, &ctx)?;
		let frame = Frame::new(FrameType::Data, encoded)?;
		let Some(frame) = self.pipeline.outbound(frame).await? else {
			self.correlator.cancel(id);
			return Err(Error::Cancelled);
		};
		let transport = self.transport.lock().clone().ok_or(Error::NotConnected)?;
		transport.send(&frame.payload).await?;
		let payload = self.correlator.wait(id, rx, self.config.request_timeout).await?;
		self.adapter.decode(&payload, None, &ctx)
	}

	/// Sends a one-way message with no matching response expected.
	pub async fn send_notification(&self, message: &serde_json::Value) -> Result<()> {
		if self.state() != ConnectionState::Connected {
			return Err(Error::NotConnected);
		}
		let ctx = EncodeCtx { connection_id: Some(self.id), ..Default::default() };
		let encoded = self.adapter.encode(message, &ctx)?;
		let frame = Frame::new(FrameType::Data, encoded)?;
		let Some(frame) = self.pipeline.outbound(frame).await? else {
			return Ok(());
		};
		let transport = self.transport.lock().clone().ok_or(Error::NotConnected)?;
		transport.send(&frame.payload).await
	}

	/// Gracefully drains: stops accepting new requests, waits for the
	/// transport to report closed, then marks `Disconnected`.
	pub async fn close(&self) -> Result<()> {
		if self.state.current() == ConnectionState::Disconnected {
			return Ok(());
		}
		self.state.transition(ConnectionState::Disconnecting)?;
		self.correlator.fail_all(|| Error::Cancelled);
		if let Some(transport) = self.transport.lock().take() {
			transport.close().await?;
		}
		self.state.transition(ConnectionState::Disconnected)
	}

	/// Called by the transport's read loop whenever more bytes arrive.
	/// Appends to the connection's [`ReadBuffer`] (C1), drains complete
	/// frames via the adapter's classifier (C4), and for each classified
	/// event: runs it through the inbound pipeline (C5), then either
	/// resolves a pending request (C6) or publishes a notification.
	///
	/// `ProtocolViolation` frame errors are surfaced to the caller so the
	/// owning read loop can drive the state machine into `Reconnecting`/
	/// `Disconnected` per spec §7; any other inbound error is recorded and
	/// the offending frame is dropped, leaving the connection up.
	pub async fn on_bytes_received(&self, bytes: &[u8]) -> Result<()> {
		let events = {
			let mut buffer = self.read_buffer.lock();
			buffer.append(bytes)?;
			self.adapter.on_incoming(&mut buffer)?
		};
		for event in events {
			self.dispatch_event(event).await;
		}
		Ok(())
	}

	async fn dispatch_event(&self, event: Event) {
		match event {
			Event::Response { id, payload } => {
				let frame = match Frame::new(FrameType::Data, payload) {
					Ok(f) => f,
					Err(err) => {
						tracing::warn!(%err, "dropping oversized response frame");
						return;
					},
				};
				match self.pipeline.inbound(frame).await {
					Ok(Some(frame)) => {
						self.deliver_response(id, frame.payload);
					},
					Ok(None) => {},
					Err(err) => tracing::warn!(%err, request_id = id, "inbound pipeline rejected response"),
				}
			},
			Event::Notification { event, payload } => {
				let frame = match Frame::new(FrameType::Data, payload) {
					Ok(f) => f,
					Err(err) => {
						tracing::warn!(%err, "dropping oversized notification frame");
						return;
					},
				};
				match self.pipeline.inbound(frame).await {
					Ok(Some(frame)) => {
						let _ = self.notifications.send(Notification { event, payload: frame.payload });
					},
					Ok(None) => {},
					Err(err) => tracing::warn!(%err, %event, "inbound pipeline rejected notification"),
				}
			},
			Event::Control { kind: ControlKind::Heartbeat, .. } => {
				tracing::trace!("heartbeat received");
			},
			Event::Control { kind, .. } => {
				tracing::debug!(?kind, "control frame received");
			},
			Event::Error { cause } => {
				tracing::warn!(%cause, "adapter reported a decode error; frame dropped");
			},
		}
	}
}

/// Lets a [`Pool`](crate::pool::Pool) check out `Arc<Connection>`s directly:
/// a connection's read loop (spawned by whichever transport dialed it, e.g.
/// `conduit-tcp::connect`) holds its own `Arc` clone for as long as it
/// drives the socket, so the pool can only own the resource through a
/// shared reference, not by value.
#[async_trait]
impl Poolable for Arc<Connection> {
	async fn validate(&self) -> bool {
		self.state() == ConnectionState::Connected
	}

	async fn close(&self) {
		if let Err(err) = Connection::close(self).await {
			tracing::warn!(connection_id = %self.id(), %err, "error closing pooled connection");
		}
	}
}

/// Assembles a [`Connection`] from its parts the way `conduit-cli` (and any
/// other caller) is meant to: pick an endpoint, a protocol adapter, an
/// optional middleware chain, and the config surface in spec §6, then hand
/// the result to a transport's `connect`/`attach_transport` pair. Dialing
/// itself is transport-specific, so this builder stops at producing a
/// not-yet-connected [`Connection`] plus its [`Pipeline`].
pub struct ConnectionBuilder {
	endpoint: Option<Endpoint>,
	adapter: Option<Arc<dyn ProtocolAdapter>>,
	pipeline: Pipeline,
	config: ConnectionConfig,
}

impl ConnectionBuilder {
	pub fn new() -> Self {
		Self { endpoint: None, adapter: None, pipeline: Pipeline::new(), config: ConnectionConfig::default() }
	}

	pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
		self.endpoint = Some(endpoint);
		self
	}

	pub fn adapter(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Self {
		self.adapter = Some(adapter);
		self
	}

	pub fn middleware(mut self, middleware: Arc<dyn crate::pipeline::middleware::Middleware>) -> Self {
		self.pipeline = self.pipeline.with_middleware(middleware);
		self
	}

	pub fn plugin(mut self, plugin: Arc<dyn crate::pipeline::plugin::Plugin>) -> Self {
		self.pipeline = self.pipeline.with_plugin(plugin);
		self
	}

	pub fn config(mut self, config: ConnectionConfig) -> Self {
		self.config = config;
		self
	}

	/// Builds the (not yet connected) [`Connection`]. A transport then dials
	/// the endpoint and calls [`Connection::attach_transport`].
	pub fn build(self) -> Result<Connection> {
		let endpoint = self.endpoint.ok_or_else(|| Error::InvalidEndpoint("no endpoint configured".into()))?;
		let adapter = self
			.adapter
			.unwrap_or_else(|| Arc::new(crate::framing::wire::BinaryProtocolAdapter::default()));
		Ok(Connection::new(endpoint, adapter, Arc::new(self.pipeline), self.config))
	}
}

impl Default for ConnectionBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::framing::wire::BinaryProtocolAdapter;
	use std::sync::atomic::{AtomicBool, Ordering};

	struct FakeTransport {
		sent: Mutex<Vec<Vec<u8>>>,
		closed: AtomicBool,
	}

	impl FakeTransport {
		fn new() -> Arc<Self> {
			Arc::new(Self { sent: Mutex::new(Vec::new()), closed: AtomicBool::new(false) })
		}
	}

	#[async_trait]
	impl Transport for FakeTransport {
		async fn send(&self, bytes: &[u8]) -> Result<()> {
			self.sent.lock().push(bytes.to_vec());
			Ok(())
		}
		async fn close(&self) -> Result<()> {
			self.closed.store(true, Ordering::Relaxed);
			Ok(())
		}
	}

	fn test_connection() -> Connection {
		Connection::new(
			Endpoint::Tcp { host: "localhost".into(), port: 9000 },
			Arc::new(BinaryProtocolAdapter::new()),
			Arc::new(Pipeline::new()),
			ConnectionConfig::default(),
		)
	}

	#[tokio::test]
	async fn send_request_before_connecting_fails() {
		let conn = test_connection();
		let err = conn.send_request(&serde_json::json!({})).await.unwrap_err();
		assert!(matches!(err, Error::NotConnected));
	}

	#[tokio::test]
	async fn close_is_idempotent_when_never_connected() {
		let conn = test_connection();
		conn.close().await.unwrap();
		conn.close().await.unwrap();
	}

	#[tokio::test]
	async fn request_resolves_once_response_is_delivered() {
		let conn = Arc::new(test_connection());
		conn.begin_connecting().unwrap();
		conn.attach_transport(FakeTransport::new()).unwrap();

		// Directly exercise deliver_response against a known id instead,
		// since wiring a full fake server round-trip is conduit-tcp's job.
		let (id, rx) = conn.correlator().begin().unwrap();
		assert!(conn.deliver_response(id, b"hi".to_vec()));
		assert_eq!(rx.await.unwrap().unwrap(), b"hi");
	}

	#[tokio::test]
	async fn close_after_connect_calls_transport_close() {
		let conn = test_connection();
		conn.begin_connecting().unwrap();
		let transport = FakeTransport::new();
		conn.attach_transport(transport.clone()).unwrap();
		conn.close().await.unwrap();
		assert!(transport.closed.load(Ordering::Relaxed));
		assert_eq!(conn.state(), ConnectionState::Disconnected);
	}

	#[tokio::test]
	async fn close_fails_any_still_pending_request() {
		let conn = test_connection();
		conn.begin_connecting().unwrap();
		conn.attach_transport(FakeTransport::new()).unwrap();
		let (_id, rx) = conn.correlator().begin().unwrap();
		conn.close().await.unwrap();
		assert!(matches!(rx.await.unwrap(), Err(Error::Cancelled)));
	}

	#[tokio::test]
	async fn on_bytes_received_resolves_a_pending_request_by_id() {
		let conn = test_connection();
		conn.begin_connecting().unwrap();
		conn.attach_transport(FakeTransport::new()).unwrap();

		let (id, rx) = conn.correlator().begin().unwrap();
		let adapter = BinaryProtocolAdapter::new();
		let ctx = EncodeCtx::default();
		let encoded = adapter.encode(&serde_json::json!({"ok": true}), &ctx).unwrap();
		let wire = adapter.encode_response(id, &encoded);

		conn.on_bytes_received(&wire).await.unwrap();
		let payload = rx.await.unwrap().unwrap();
		assert_eq!(payload, encoded);
	}

	#[tokio::test]
	async fn on_bytes_received_publishes_unmatched_events_as_notifications() {
		let conn = test_connection();
		conn.begin_connecting().unwrap();
		conn.attach_transport(FakeTransport::new()).unwrap();
		let mut notifications = conn.subscribe_notifications();

		let adapter = BinaryProtocolAdapter::new();
		let wire = adapter.encode_notification("7", b"hello".to_vec());
		conn.on_bytes_received(&wire).await.unwrap();

		let notification = notifications.recv().await.unwrap();
		assert_eq!(notification.event, "7");
		assert_eq!(notification.payload, b"hello");
	}

	#[tokio::test]
	async fn on_bytes_received_leaves_a_partial_frame_buffered() {
		let conn = test_connection();
		conn.begin_connecting().unwrap();
		conn.attach_transport(FakeTransport::new()).unwrap();
		let adapter = BinaryProtocolAdapter::new();
		let wire = adapter.encode_notification("7", b"hello".to_vec());
		conn.on_bytes_received(&wire[..wire.len() - 2]).await.unwrap();
		let mut notifications = conn.subscribe_notifications();
		conn.on_bytes_received(&wire[wire.len() - 2..]).await.unwrap();
		let notification = notifications.recv().await.unwrap();
		assert_eq!(notification.event, "7");
	}

	#[test]
	fn builder_requires_an_endpoint() {
		let err = ConnectionBuilder::new().build().unwrap_err();
		assert!(matches!(err, Error::InvalidEndpoint(_)));
	}

	#[test]
	fn builder_produces_a_disconnected_connection_for_the_given_endpoint() {
		let endpoint = Endpoint::Tcp { host: "example.test".into(), port: 9000 };
		let conn = ConnectionBuilder::new().endpoint(endpoint.clone()).build().unwrap();
		assert_eq!(conn.state(), ConnectionState::Disconnected);
		assert_eq!(conn.endpoint(), &endpoint);
	}

	#[tokio::test]
	async fn arc_connection_is_poolable_by_connected_state() {
		let conn = Arc::new(test_connection());
		assert!(!Poolable::validate(&conn).await);
		conn.begin_connecting().unwrap();
		conn.attach_transport(FakeTransport::new()).unwrap();
		assert!(Poolable::validate(&conn).await);
		Poolable::close(&conn).await;
		assert_eq!(conn.state(), ConnectionState::Disconnected);
	}
}
