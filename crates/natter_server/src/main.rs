#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use natter_server::config::{default_config_path, load_server_config_from_path};
use natter_server::server::health::{HealthState, spawn_health_server};
use natter_server::server::http;
use natter_server::server::state::AppState;
use natter_server::server::store::{ChatStore, InMemoryStore, SqlStore};
use natter_util::endpoint::HttpEndpoint;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: natter_server [--bind http://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: config server.bind, else http://127.0.0.1:3000)\n\
\t         Format: http://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

/// `--bind` override, if given.
fn parse_args() -> Option<String> {
	let mut bind_endpoint = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected http://host:port)");
					usage_and_exit();
				}
				bind_endpoint = Some(v);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	bind_endpoint
}

fn resolve_bind(endpoint: &str) -> anyhow::Result<SocketAddr> {
	let bind = HttpEndpoint::parse(endpoint).map_err(|e| anyhow!(e))?;
	bind.to_socket_addr_if_ip_literal().map_err(|e| anyhow!(e))
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,natter_server=debug".to_string());

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
				let tracer = tracer_provider.tracer("natter_server");
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

	match bind.parse::<SocketAddr>() {
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_override = parse_args();

	let config_path = default_config_path()?;
	let mut server_cfg = load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	if let Some(bind) = bind_override {
		server_cfg.server.bind = bind;
	}
	server_cfg.validate().context("invalid server config")?;
	let bind_addr = resolve_bind(&server_cfg.server.bind).context("invalid bind endpoint")?;

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let store: Arc<dyn ChatStore> = match server_cfg.persistence.database_url.as_deref() {
		Some(url) => Arc::new(SqlStore::connect(url).await?),
		None => {
			warn!("no database_url configured; using the in-memory store (data is lost on restart)");
			Arc::new(InMemoryStore::new())
		}
	};

	let state = AppState::new(&server_cfg, store);
	let router = http::build_router(state).context("build http router")?;
	let listener = http::bind(bind_addr).await?;
	info!(bind = %bind_addr, frontend = %server_cfg.server.frontend_url, "natter_server: ready");

	health_state.mark_ready();

	http::serve(listener, router).await
}
