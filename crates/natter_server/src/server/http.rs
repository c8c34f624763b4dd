#![forbid(unsafe_code)]

use std::net::SocketAddr;

use anyhow::Context as _;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, RawQuery, Request, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::server::api;
use crate::server::connection::handle_connection;
use crate::server::handshake::HandshakeRequest;
use crate::server::state::AppState;
use crate::server::throttle::throttle;

pub const SOCKET_PATH: &str = "/socket";

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
	success: bool,
	message: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	data: Option<T>,
}

fn envelope<T: Serialize>(status: StatusCode, success: bool, message: &str, data: Option<T>) -> Response {
	(status, Json(Envelope { success, message, data })).into_response()
}

/// `{success: true, message, data}`.
pub fn json_ok<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
	envelope(status, true, message, Some(data))
}

/// `{success: true, message}` with no data.
pub fn json_message(status: StatusCode, message: &str) -> Response {
	envelope::<()>(status, true, message, None)
}

/// `{success: false, message}`.
pub fn json_error(status: StatusCode, message: &str) -> Response {
	envelope::<()>(status, false, message, None)
}

pub fn unauthorized() -> Response {
	json_error(StatusCode::UNAUTHORIZED, "Unauthorized")
}

fn cors_layer(frontend_url: &str) -> anyhow::Result<CorsLayer> {
	let origin = HeaderValue::from_str(frontend_url)
		.with_context(|| format!("frontend_url is not a valid origin: {frontend_url:?}"))?;

	Ok(CorsLayer::new()
		.allow_origin(origin)
		.allow_credentials(true)
		.allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
		.allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}

/// REST under `/api/v1` plus the realtime socket.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
	let credential_routes = throttle(
		Router::new()
			.route("/api/v1/auth/register", post(api::register))
			.route("/api/v1/auth/login", post(api::login)),
		state.http.throttle,
	)?;

	let routes = Router::new()
		.route("/api/v1/health", get(api::health))
		.route("/api/v1/auth/logout", post(api::logout))
		.route("/api/v1/auth/update-user", put(api::update_user))
		.route("/api/v1/auth/me", get(api::me))
		.route("/api/v1/messages/all-contacts", get(api::all_contacts))
		.route("/api/v1/messages/chat-contacts", get(api::chat_contacts))
		.route("/api/v1/messages/online", get(api::online_users))
		.route("/api/v1/messages/send/{id}", post(api::send_message))
		.route("/api/v1/messages/{id}", get(api::conversation))
		.route(SOCKET_PATH, get(socket_upgrade))
		.merge(credential_routes)
		.fallback(api::not_found)
		.method_not_allowed_fallback(api::not_found);

	let cors = cors_layer(&state.http.frontend_url)?;
	let body_limit = state.http.max_body_bytes;

	Ok(routes
		.with_state(state)
		.layer(DefaultBodyLimit::max(body_limit))
		.layer(cors)
		.layer(middleware::from_fn(count_requests)))
}

async fn count_requests(req: Request, next: Next) -> Response {
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	metrics::counter!("natter_server_http_requests_total", "method" => method.to_string()).increment(1);

	let resp = next.run(req).await;
	debug!(%method, %path, status = resp.status().as_u16(), "http request");
	resp
}

/// Authenticate, then switch to a WebSocket. Failed auth never upgrades.
async fn socket_upgrade(
	State(state): State<AppState>,
	RawQuery(query): RawQuery,
	headers: HeaderMap,
	ws: WebSocketUpgrade,
) -> Response {
	let cookie_header = headers.get(header::COOKIE).and_then(|v| v.to_str().ok());
	let context = match state.authenticator.authenticate(HandshakeRequest {
		cookie_header,
		query: query.as_deref(),
	}) {
		Ok(ctx) => ctx,
		Err(e) => {
			debug!(error = %e, "socket handshake rejected");
			return unauthorized();
		}
	};

	let gateway = state.gateway.clone();
	let settings = state.connection.clone();

	ws.max_message_size(settings.max_frame_bytes)
		.max_frame_size(settings.max_frame_bytes)
		.on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
		.on_upgrade(move |socket| async move {
			if let Err(e) = handle_connection(socket, gateway, context, settings).await {
				warn!(error = %e, "realtime connection ended with error");
			}
		})
}

/// Bind the listener for the API + WebSocket surface.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
	TcpListener::bind(addr)
		.await
		.with_context(|| format!("bind http listener on {addr}"))
}

/// Serve `router` until the listener fails. Peer addresses reach the throttle via connect info.
pub async fn serve(listener: TcpListener, router: Router) -> anyhow::Result<()> {
	if let Ok(addr) = listener.local_addr() {
		info!(%addr, "natter_server: http listener ready");
	}

	axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
		.await
		.context("serve http")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn envelopes_have_expected_shape() {
		let resp = unauthorized();
		assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
		assert_eq!(
			resp.headers().get(header::CONTENT_TYPE).unwrap(),
			HeaderValue::from_static("application/json")
		);
	}

	#[test]
	fn frontend_url_must_be_a_header_value() {
		assert!(cors_layer("http://localhost:5173").is_ok());
		assert!(cors_layer("http://bad\norigin").is_err());
	}
}
