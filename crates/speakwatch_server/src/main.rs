#![forbid(unsafe_code)]

mod adapters;
mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, bail};
use chrono::Utc;
use speakwatch_platform::{RestClient, Upstream};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::adapters::DemoUpstream;
use crate::config::ServerConfig;
use crate::server::directory::Directory;
use crate::server::gateway::Gateway;
use crate::server::health::HealthState;
use crate::server::notifier::Notifier;
use crate::server::path::PathResolver;
use crate::server::poller::{Poller, Watermark, spawn_poller};
use crate::server::publisher::{DEFAULT_CHANGE_CHANNEL_CAPACITY, change_channel, spawn_publisher};
use crate::server::state_store::StateStore;
use crate::server::supervisor::{BackgroundTasks, supervise};

/// Dev-only demo upstream enable flag.
const SPEAKWATCH_ENABLE_DEMO_UPSTREAM_ENV: &str = "SPEAKWATCH_ENABLE_DEMO_UPSTREAM";

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: speakwatch_server [--bind host:port] [--config path]\n\
\n\
Options:\n\
\t--bind     Listen address (default: 0.0.0.0:8080, or 0.0.0.0:$PORT)\n\
\t--config   Config file (default: ~/.speakwatch/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct Args {
	bind: Option<String>,
	config: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args = Args::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				args.bind = Some(v);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,speakwatch_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("speakwatch_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn demo_upstream_enabled() -> bool {
	cfg!(debug_assertions)
		&& std::env::var(SPEAKWATCH_ENABLE_DEMO_UPSTREAM_ENV)
			.ok()
			.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn build_upstream(cfg: &ServerConfig) -> anyhow::Result<Arc<dyn Upstream>> {
	if demo_upstream_enabled() {
		warn!("using in-process demo upstream; no real chat data will be relayed");
		return Ok(Arc::new(DemoUpstream::new()));
	}

	let Some(rest_cfg) = cfg.rest_config() else {
		bail!("no bot token configured (set SPEAKWATCH_BOT_TOKEN or TRAQ_BOT_TOKEN, or bot_token in the config file)");
	};

	info!(base_url = %rest_cfg.base_url, "using upstream REST API");
	let client = RestClient::new(rest_cfg).context("build upstream client")?;
	Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let mut server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	if let Some(bind) = args.bind {
		server_cfg.server.bind = Some(bind);
	}
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let bind_addr = server_cfg.bind_addr()?;
	let upstream = build_upstream(&server_cfg)?;

	let directory = Arc::new(Directory::new(Arc::clone(&upstream), server_cfg.directory_config()));
	let (channels, users) = tokio::try_join!(upstream.list_channels(), upstream.list_users())
		.context("initial channel/user listing")?;
	directory.bulk_load(channels, users);
	let stats = directory.stats();
	info!(channels = stats.channels, users = stats.users, "directory loaded");

	let watermark = Watermark::new(Utc::now());

	let state = Arc::new(StateStore::new());
	let notifier = Notifier::new(Arc::clone(&state), server_cfg.notifier_config());

	let (changes_tx, changes_rx) = change_channel(DEFAULT_CHANGE_CHANNEL_CAPACITY);
	let publisher = spawn_publisher(changes_rx, notifier.clone(), server_cfg.publisher_config());

	let resolver = PathResolver::new(Arc::clone(&directory), server_cfg.directory.max_path_depth);
	let poller = Poller::new(
		upstream,
		directory,
		resolver,
		watermark,
		server_cfg.poller_config(),
		changes_tx,
	);
	let poller = spawn_poller(poller);

	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("bind {bind_addr}"))?;
	let local_addr = listener.local_addr()?;

	let health = HealthState::new();
	health.mark_ready();
	info!(bind = %local_addr, "speakwatch_server: listening (health on /, websocket on /ws)");

	let serve = Gateway::new(health.clone(), notifier).serve(listener);
	supervise(&health, serve, BackgroundTasks { poller, publisher }).await
}
