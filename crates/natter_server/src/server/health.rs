#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::warn;

/// Liveness/readiness flag shared with the health listener.
#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind)
		.await
		.with_context(|| format!("bind health listener on {bind}"))?;
	axum::serve(listener, health_router(state)).await.context("serve health")
}

fn health_router(state: HealthState) -> Router {
	Router::new()
		.route("/healthz", get(healthz))
		.route("/readyz", get(readyz))
		.with_state(state)
}

async fn healthz() -> &'static str {
	"ok"
}

async fn readyz(State(state): State<HealthState>) -> (StatusCode, &'static str) {
	if state.is_ready() {
		(StatusCode::OK, "ready")
	} else {
		(StatusCode::SERVICE_UNAVAILABLE, "not-ready")
	}
}
