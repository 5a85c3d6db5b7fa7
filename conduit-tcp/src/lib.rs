//! The one worked transport example the Non-goals permit: a reference
//! binary-framed carrier over `tokio::net::TcpStream`, implementing
//! [`conduit_core::Transport`].
//!
//! Grounded on the teacher's `hbone::client::spawn_connection`/
//! `drive_connection` pair (`crates/hbone/src/client.rs`): dial, split the
//! stream, spawn a background task that drives the connection and can be
//! told to stop via a `watch` drain signal, hand the write half back to the
//! caller wrapped behind the `Transport` trait.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::connection::{ConnectionBuilder, ConnectionConfig};
use conduit_core::framing::ProtocolAdapter;
use conduit_core::pool::PoolFactory;
use conduit_core::reconnect::Dialer;
use conduit_core::{Connection, ConnectionState, Endpoint, Error, Result, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, watch};

/// Chunk size for each `TcpStream::read` call; frames accumulate in the
/// connection's own [`conduit_core`] read buffer across calls, so this is
/// just a read-syscall granularity knob, not a frame-size limit.
const READ_CHUNK: usize = 64 * 1024;

/// The [`Transport`] side of a dialed TCP connection: owns the write half
/// and the drain signal that stops the paired read-loop task.
pub struct TcpTransport {
	write_half: Mutex<OwnedWriteHalf>,
	drain: watch::Sender<bool>,
}

#[async_trait]
impl Transport for TcpTransport {
	async fn send(&self, bytes: &[u8]) -> Result<()> {
		let mut write_half = self.write_half.lock().await;
		write_half.write_all(bytes).await.map_err(Error::Io)
	}

	async fn close(&self) -> Result<()> {
		let _ = self.drain.send(true);
		let mut write_half = self.write_half.lock().await;
		let _ = write_half.shutdown().await;
		Ok(())
	}
}

/// Dials `endpoint` (must be [`Endpoint::Tcp`]), attaches the resulting
/// [`TcpTransport`] to `connection`, and spawns the read loop that feeds
/// inbound bytes to [`Connection::on_bytes_received`].
///
/// On a `ProtocolViolation` surfaced from `on_bytes_received`, the read loop
/// logs it and stops driving the connection without forcing a state
/// transition itself — per spec §7, the state machine transition on that
/// path is this function's caller's responsibility (e.g. a reconnect loop
/// watching [`Connection::subscribe_state`]).
pub async fn connect(connection: Arc<Connection>) -> Result<()> {
	let Endpoint::Tcp { host, port } = connection.endpoint() else {
		return Err(Error::InvalidEndpoint(format!("conduit-tcp cannot dial {}", connection.endpoint())));
	};
	let addr = format!("{host}:{port}");
	connection.begin_connecting()?;
	let stream = TcpStream::connect(&addr).await.map_err(|err| {
		if err.kind() == io::ErrorKind::ConnectionRefused {
			Error::ConnectionRefused
		} else {
			Error::Io(err)
		}
	})?;
	stream.set_nodelay(true).ok();
	let (read_half, write_half) = stream.into_split();
	let (drain_tx, drain_rx) = watch::channel(false);
	let transport = Arc::new(TcpTransport { write_half: Mutex::new(write_half), drain: drain_tx });
	connection.attach_transport(transport)?;

	tokio::spawn(drive_connection(connection, read_half, drain_rx));
	Ok(())
}

/// A [`Dialer`] that redials the same [`Connection`]'s own endpoint over
/// TCP — what [`conduit_core::reconnect::ReconnectLoop`] calls on each
/// attempt once a connection has entered `Reconnecting`. Stateless: it just
/// forwards to [`connect`], which re-attaches a fresh [`TcpTransport`] and
/// respawns the read loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
	async fn dial(&self, connection: Arc<Connection>) -> Result<()> {
		connect(connection).await
	}
}

/// A [`PoolFactory`] that dials a fresh TCP connection to a fixed endpoint
/// on every `create()` call, the way `conduit-core`'s generic [`Pool`]
/// (C10) expects — grounded on the teacher's `hbone::pool` handing its
/// `WorkloadHBONEPool` a dial closure rather than a fixed socket.
///
/// `Pool<T>` owns `T` by value, but a dialed connection's read loop holds
/// its own `Arc<Connection>` clone for as long as it drives the socket
/// (see [`connect`]), so this factory produces `Arc<Connection>` and relies
/// on `conduit_core`'s `impl Poolable for Arc<Connection>`.
pub struct TcpConnectionFactory {
	endpoint: Endpoint,
	adapter: Arc<dyn ProtocolAdapter>,
	config: ConnectionConfig,
}

impl TcpConnectionFactory {
	pub fn new(endpoint: Endpoint, adapter: Arc<dyn ProtocolAdapter>, config: ConnectionConfig) -> Self {
		Self { endpoint, adapter, config }
	}
}

#[async_trait]
impl PoolFactory<Arc<Connection>> for TcpConnectionFactory {
	async fn create(&self) -> Result<Arc<Connection>> {
		let connection = Arc::new(
			ConnectionBuilder::new()
				.endpoint(self.endpoint.clone())
				.adapter(self.adapter.clone())
				.config(self.config.clone())
				.build()?,
		);
		connect(connection.clone()).await?;
		Ok(connection)
	}
}

/// Steps the connection into `Reconnecting{1}` after the socket dies, per
/// spec §7 ("I/O errors on read/write: transition to `Reconnecting` if
/// strategy allows, else to `Disconnected`"). A no-op (logged at `trace`)
/// if the connection was already leaving `Connected` on its own — e.g. a
/// concurrent `Connection::close()` already moved it to `Disconnecting`.
fn reconnect_or_log(connection: &Arc<Connection>) {
	if let Err(err) = connection.mark_reconnecting(1) {
		tracing::trace!(connection_id = %connection.id(), %err, "no reconnect transition from this state");
	}
}

async fn drive_connection(
	connection: Arc<Connection>,
	mut read_half: tokio::net::tcp::OwnedReadHalf,
	mut drain: watch::Receiver<bool>,
) {
	let mut chunk = vec![0u8; READ_CHUNK];
	loop {
		tokio::select! {
			_ = drain.changed() => {
				tracing::debug!(connection_id = %connection.id(), "tcp transport draining");
				return;
			}
			read = read_half.read(&mut chunk) => {
				match read {
					Ok(0) => {
						tracing::debug!(connection_id = %connection.id(), "peer closed the tcp connection");
						reconnect_or_log(&connection);
						return;
					}
					Ok(n) => {
						if let Err(err) = connection.on_bytes_received(&chunk[..n]).await {
							match err {
								Error::ProtocolViolation { expected } => {
									tracing::warn!(connection_id = %connection.id(), %expected, "protocol violation, stopping read loop");
									return;
								}
								other => {
									tracing::warn!(connection_id = %connection.id(), err = %other, "error processing inbound bytes");
								}
							}
						}
					}
					Err(err) => {
						tracing::warn!(connection_id = %connection.id(), %err, "tcp read error, stopping read loop");
						reconnect_or_log(&connection);
						return;
					}
				}
			}
		}
		if connection.state() == ConnectionState::Disconnected {
			return;
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use conduit_core::framing::wire::BinaryProtocolAdapter;
	use conduit_core::pool::Poolable;
	use conduit_core::{ConnectionBuilder, ConnectionState, Endpoint};
	use tokio::io::AsyncReadExt;
	use tokio::net::TcpListener;

	use super::*;

	#[tokio::test]
	async fn connect_dials_and_reaches_the_connected_state() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (socket, _) = listener.accept().await.unwrap();
			socket
		});

		let connection = Arc::new(
			ConnectionBuilder::new()
				.endpoint(Endpoint::Tcp { host: addr.ip().to_string(), port: addr.port() })
				.adapter(Arc::new(BinaryProtocolAdapter::new()))
				.build()
				.unwrap(),
		);
		connect(connection.clone()).await.unwrap();
		assert_eq!(connection.state(), ConnectionState::Connected);
		server.await.unwrap();
	}

	#[tokio::test]
	async fn peer_close_drives_the_connection_into_reconnecting() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (socket, _) = listener.accept().await.unwrap();
			drop(socket);
		});

		let connection = Arc::new(
			ConnectionBuilder::new()
				.endpoint(Endpoint::Tcp { host: addr.ip().to_string(), port: addr.port() })
				.adapter(Arc::new(BinaryProtocolAdapter::new()))
				.build()
				.unwrap(),
		);
		connect(connection.clone()).await.unwrap();
		// give the spawned read loop a moment to observe the peer closing
		tokio::time::sleep(std::time::Duration::from_millis(50)).await;
		assert_eq!(connection.state(), ConnectionState::Reconnecting { attempt: 1 });
	}

	#[tokio::test]
	async fn connect_fails_for_a_non_tcp_endpoint() {
		let connection = Arc::new(
			ConnectionBuilder::new()
				.endpoint(Endpoint::Unix { path: "/tmp/conduit.sock".into() })
				.build()
				.unwrap(),
		);
		let err = connect(connection).await.unwrap_err();
		assert!(matches!(err, Error::InvalidEndpoint(_)));
	}

	#[tokio::test]
	async fn factory_dials_a_connected_connection_on_each_create() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			loop {
				let Ok((socket, _)) = listener.accept().await else { return };
				tokio::spawn(async move {
					let _ = socket;
				});
			}
		});

		let factory = TcpConnectionFactory::new(
			Endpoint::Tcp { host: addr.ip().to_string(), port: addr.port() },
			Arc::new(BinaryProtocolAdapter::new()),
			conduit_core::ConnectionConfig::default(),
		);
		let connection = factory.create().await.unwrap();
		assert_eq!(connection.state(), ConnectionState::Connected);
		assert!(Poolable::validate(&connection).await);
		Poolable::close(&connection).await;
		assert_eq!(connection.state(), ConnectionState::Disconnected);
	}
}
