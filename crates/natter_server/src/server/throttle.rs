#![forbid(unsafe_code)]

//! Per-IP throttling for the credential endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::Response;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tracing::debug;

use crate::server::http::json_error;
use crate::server::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Token bucket per client IP: `burst` requests up front, one more every `refill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
	/// Zero turns throttling off.
	pub burst: u32,
	pub refill: Duration,
}

impl Default for ThrottleSettings {
	fn default() -> Self {
		Self {
			burst: 3,
			refill: Duration::from_millis(3334),
		}
	}
}

/// Wrap `routes` in the per-IP bucket. Requests over budget get 403 `Request blocked`.
///
/// The peer address comes from `ConnectInfo<SocketAddr>`, so the router must be served
/// with connect info.
pub fn throttle(routes: Router<AppState>, settings: ThrottleSettings) -> anyhow::Result<Router<AppState>> {
	if settings.burst == 0 {
		return Ok(routes);
	}

	let config = Arc::new(
		GovernorConfigBuilder::default()
			.key_extractor(PeerIpKeyExtractor)
			.period(settings.refill)
			.burst_size(settings.burst)
			.finish()
			.ok_or_else(|| anyhow!("invalid throttle settings: {settings:?}"))?,
	);

	let limiter = config.limiter().clone();
	tokio::spawn(async move {
		loop {
			tokio::time::sleep(SWEEP_INTERVAL).await;
			limiter.retain_recent();
		}
	});

	Ok(routes
		.layer(GovernorLayer::new(config))
		.layer(middleware::map_response(blocked_as_forbidden)))
}

async fn blocked_as_forbidden(resp: Response) -> Response {
	if resp.status() != StatusCode::TOO_MANY_REQUESTS {
		return resp;
	}

	metrics::counter!("natter_server_http_throttled_total").increment(1);
	debug!("http: request throttled");
	json_error(StatusCode::FORBIDDEN, "Request blocked")
}
