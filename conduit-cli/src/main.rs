//! Reference CLI exercising `conduit-core` end-to-end over `conduit-tcp`:
//! parses a config file, warms up a connection pool against a TCP endpoint,
//! issues one request, and prints connection/pool/metrics snapshots before
//! draining.
//!
//! Grounded on the teacher's `agentgateway-app::main` (`clap::Parser` args,
//! a current-thread `tokio` runtime, and the library-uses-thiserror /
//! binary-uses-anyhow split via `.context(...)` at every fallible call).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use conduit_core::framing::wire::BinaryProtocolAdapter;
use conduit_core::metrics::Metrics;
use conduit_core::network::NetworkObserver;
use conduit_core::pool::Pool;
use conduit_core::reconnect::ReconnectLoop;
use conduit_core::{BuildInfo, ClientConfig, Connection, Endpoint};
use conduit_tcp::{TcpConnectionFactory, TcpDialer};
use prometheus_client::registry::Registry;

#[derive(Parser, Debug)]
#[command(name = "conduit", about = "Reference client for the conduit connection engine", long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Endpoint to dial, as `host:port`.
	#[arg(long, value_name = "host:port", default_value = "127.0.0.1:9000")]
	endpoint: String,

	/// Load the client configuration from this YAML or JSON file (the
	/// extension picks the parser); defaults are used when omitted.
	#[arg(short, long, value_name = "file")]
	config: Option<PathBuf>,

	/// JSON payload sent as a request; the decoded response is printed.
	#[arg(long, value_name = "json", default_value = "{}")]
	request: String,

	/// Send the payload as a fire-and-forget notification instead of a
	/// correlated request.
	#[arg(long)]
	notify: bool,

	/// Print a metrics snapshot before exiting, in the given format
	/// (`prometheus`, `json`, or `tsv`).
	#[arg(long, value_name = "format")]
	metrics: Option<String>,

	/// Print the build version and exit.
	#[arg(short = 'V', long = "version")]
	version: bool,
}

fn main() -> anyhow::Result<()> {
	conduit_core::telemetry::init();
	let args = Args::parse();

	if args.version {
		println!("{}", BuildInfo::current());
		return Ok(());
	}

	tokio::runtime::Builder::new_current_thread().enable_all().build()?.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
	let client_config = load_config(args.config.as_deref())?;
	let endpoint = parse_endpoint(&args.endpoint)?;
	tracing::info!(%endpoint, version = %BuildInfo::current(), "dialing");

	let mut registry = Registry::default();
	let metrics =
		Metrics::with_monitoring(&mut registry, client_config.monitoring.sampling_rate, client_config.monitoring.retention);

	let adapter = Arc::new(BinaryProtocolAdapter::new());
	let factory =
		Arc::new(TcpConnectionFactory::new(endpoint, adapter, client_config.connection.clone()));
	let pool: Pool<Arc<Connection>> = Pool::new(client_config.pool.clone(), factory);
	pool.warm_up().await.context("warming up the connection pool")?;
	metrics.incr("connections_warmed", pool.size() as u64);

	let handle = pool.acquire().await.context("acquiring a connection from the pool")?;
	// Wires C7 (state machine) + C8 (the connection's own backoff policy) +
	// C9 (network-change awareness) into a running auto-reconnect engine
	// for the checked-out connection, the way a long-lived client would
	// rather than leaving the three subsystems unconnected.
	let network = NetworkObserver::new();
	let reconnect = ReconnectLoop::spawn(
		(*handle).clone(),
		Arc::new(TcpDialer),
		client_config.connection.reconnect.clone(),
		network,
	);

	let payload: serde_json::Value =
		serde_json::from_str(&args.request).context("--request is not valid JSON")?;

	let started = std::time::Instant::now();
	if args.notify {
		handle.send_notification(&payload).await.context("sending notification failed")?;
		println!("notification sent");
	} else {
		let response = handle.send_request(&payload).await.context("request failed")?;
		metrics.record_duration("request", started.elapsed());
		metrics.incr("requests_completed", 1);
		println!("response: {response}");
	}

	println!("connection: state={:?}", handle.state());
	println!("pool: size={} in_use={} ready={}", pool.size(), pool.in_use(), pool.is_ready());

	if let Some(format) = args.metrics.as_deref() {
		metrics.expire_stale_series();
		match format {
			"json" => println!("{}", metrics.snapshot_json()),
			"tsv" => print!("{}", metrics.snapshot_tabular('\t')),
			_ => println!("{}", Metrics::encode(&registry).context("encoding metrics")?),
		}
	}

	reconnect.stop();
	handle.release().await;
	pool.drain().await;
	Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<ClientConfig> {
	let Some(path) = path else {
		return Ok(ClientConfig::default());
	};
	let contents = fs_err::read_to_string(path)
		.with_context(|| format!("reading config file {}", path.display()))?;
	if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
		ClientConfig::from_json(&contents).with_context(|| format!("parsing {} as JSON", path.display()))
	} else {
		ClientConfig::from_yaml(&contents).with_context(|| format!("parsing {} as YAML", path.display()))
	}
}

fn parse_endpoint(raw: &str) -> anyhow::Result<Endpoint> {
	let (host, port) =
		raw.rsplit_once(':').with_context(|| format!("endpoint must be host:port, got {raw:?}"))?;
	let port: u16 = port.parse().with_context(|| format!("invalid port in endpoint {raw:?}"))?;
	Ok(Endpoint::Tcp { host: host.to_string(), port })
}
