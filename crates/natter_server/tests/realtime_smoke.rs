#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use futures::{SinkExt, StreamExt};
use natter_domain::{SecretString, UserId};
use natter_protocol::{ClientEvent, ServerEvent, TypingUpdate, decode_frame, encode_frame_default};
use natter_server::config::ServerConfig;
use natter_server::server::gateway::ERROR_CODE_INVALID_EVENT;
use natter_server::server::http;
use natter_server::server::state::AppState;
use natter_server::server::store::InMemoryStore;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("NATTER_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

async fn start_server() -> anyhow::Result<(SocketAddr, AppState)> {
	start_server_with(ServerConfig::default()).await
}

async fn start_server_with(mut cfg: ServerConfig) -> anyhow::Result<(SocketAddr, AppState)> {
	cfg.auth.token_secret = Some(SecretString::new("smoke-test-secret"));
	cfg.auth.bcrypt_cost = 4;
	cfg.validate().context("test config")?;

	let state = AppState::new(&cfg, Arc::new(InMemoryStore::new()));
	let router = http::build_router(state.clone())?;
	let listener = http::bind("127.0.0.1:0".parse()?).await?;
	let addr = listener.local_addr()?;

	tokio::spawn(async move {
		if let Err(e) = http::serve(listener, router).await {
			tracing::warn!(error = %e, "test server stopped");
		}
	});

	Ok((addr, state))
}

/// Registers and logs in; returns the user id and a session token.
async fn sign_up(state: &AppState, name: &str) -> anyhow::Result<(UserId, String)> {
	let email = format!("{name}@example.com");
	state
		.accounts
		.register(&email, name, "password123")
		.await
		.map_err(|e| anyhow!("register {name}: {e}"))?;
	let (profile, token) = state
		.accounts
		.login(&email, "password123")
		.await
		.map_err(|e| anyhow!("login {name}: {e}"))?;
	Ok((profile.user_id, token))
}

async fn connect_with_query(addr: SocketAddr, token: &str) -> anyhow::Result<Client> {
	let (ws, _resp) = connect_async(format!("ws://{addr}/socket?token={token}"))
		.await
		.context("websocket connect (query token)")?;
	Ok(ws)
}

async fn connect_with_cookie(addr: SocketAddr, token: &str) -> anyhow::Result<Client> {
	let mut req = format!("ws://{addr}/socket").into_client_request()?;
	req.headers_mut()
		.insert("cookie", HeaderValue::from_str(&format!("auth_token={token}"))?);
	let (ws, _resp) = connect_async(req).await.context("websocket connect (cookie)")?;
	Ok(ws)
}

async fn wait_online(state: &AppState, user: &UserId) -> anyhow::Result<()> {
	tokio::time::timeout(READ_TIMEOUT, async {
		while !state.gateway.presence().is_online(user) {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.map_err(|_| anyhow!("{user} never came online"))
}

async fn send_event(ws: &mut Client, event: &ClientEvent) -> anyhow::Result<()> {
	let text = encode_frame_default(event)?;
	ws.send(Message::Text(text.into())).await?;
	Ok(())
}

async fn read_until(ws: &mut Client, name: &str) -> anyhow::Result<ServerEvent> {
	loop {
		let msg = ws.next().await.ok_or_else(|| anyhow!("socket closed"))??;
		let Message::Text(text) = msg else {
			continue;
		};
		let event: ServerEvent = decode_frame(text.as_str(), usize::MAX)?;
		if event.name() == name {
			return Ok(event);
		}
	}
}

/// Read until an event named `name` arrives, skipping others.
async fn next_event_named(ws: &mut Client, name: &str) -> anyhow::Result<ServerEvent> {
	tokio::time::timeout(READ_TIMEOUT, read_until(ws, name))
		.await
		.map_err(|_| anyhow!("timed out waiting for {name}"))?
}

#[tokio::test]
async fn typing_and_offline_reach_the_other_user() -> anyhow::Result<()> {
	init_test_logging();
	let (addr, state) = start_server().await?;
	let (u1, t1) = sign_up(&state, "alice").await?;
	let (u2, t2) = sign_up(&state, "bobby").await?;

	let mut ws1 = connect_with_query(addr, &t1).await?;
	wait_online(&state, &u1).await?;
	let mut ws2 = connect_with_cookie(addr, &t2).await?;
	wait_online(&state, &u2).await?;

	match next_event_named(&mut ws1, "userOnline").await? {
		ServerEvent::UserOnline(change) => assert_eq!(change.user_id, u2),
		other => panic!("unexpected event: {other:?}"),
	}

	send_event(
		&mut ws2,
		&ClientEvent::Typing(TypingUpdate {
			receiver_id: u1.clone(),
			is_typing: true,
		}),
	)
	.await?;

	match next_event_named(&mut ws1, "typingStatus").await? {
		ServerEvent::TypingStatus(status) => {
			assert_eq!(status.user_id, u2);
			assert!(status.is_typing);
		}
		other => panic!("unexpected event: {other:?}"),
	}

	ws1.close(None).await?;

	match next_event_named(&mut ws2, "userOffline").await? {
		ServerEvent::UserOffline(change) => assert_eq!(change.user_id, u1),
		other => panic!("unexpected event: {other:?}"),
	}
	assert!(!state.gateway.presence().is_online(&u1));

	Ok(())
}

#[tokio::test]
async fn unauthenticated_upgrade_is_rejected() -> anyhow::Result<()> {
	init_test_logging();
	let (addr, _state) = start_server().await?;

	let err = connect_async(format!("ws://{addr}/socket"))
		.await
		.err()
		.ok_or_else(|| anyhow!("upgrade without a token succeeded"))?;
	match err {
		tokio_tungstenite::tungstenite::Error::Http(resp) => assert_eq!(resp.status().as_u16(), 401),
		other => panic!("unexpected error: {other:?}"),
	}

	let err = connect_async(format!("ws://{addr}/socket?token=v1.forged.token"))
		.await
		.err()
		.ok_or_else(|| anyhow!("upgrade with a forged token succeeded"))?;
	assert!(matches!(err, tokio_tungstenite::tungstenite::Error::Http(_)));

	Ok(())
}

#[tokio::test]
async fn malformed_frame_gets_an_error_event() -> anyhow::Result<()> {
	init_test_logging();
	let (addr, state) = start_server().await?;
	let (_u1, t1) = sign_up(&state, "alice").await?;

	let mut ws = connect_with_query(addr, &t1).await?;
	ws.send(Message::Text("definitely not json".into())).await?;

	match next_event_named(&mut ws, "error").await? {
		ServerEvent::Error(payload) => {
			assert_eq!(payload.code, ERROR_CODE_INVALID_EVENT);
			assert_eq!(payload.message, "Invalid event", "decoder detail stays server-side");
		}
		other => panic!("unexpected event: {other:?}"),
	}

	Ok(())
}

/// Drain until the server ends the connection; true once it does.
async fn closed_by_server(ws: &mut Client) -> bool {
	loop {
		match ws.next().await {
			None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
			Some(Ok(_)) => {}
		}
	}
}

#[tokio::test]
async fn oversized_message_closes_the_connection() -> anyhow::Result<()> {
	init_test_logging();
	let mut cfg = ServerConfig::default();
	cfg.realtime.max_frame_bytes = 1024;
	let (addr, state) = start_server_with(cfg).await?;
	let (u1, t1) = sign_up(&state, "alice").await?;

	let mut ws = connect_with_query(addr, &t1).await?;
	wait_online(&state, &u1).await?;

	let oversized = format!(r#"{{"event":"typing","data":{{"pad":"{}"}}}}"#, "x".repeat(4096));
	ws.send(Message::Text(oversized.into())).await?;

	let closed = tokio::time::timeout(READ_TIMEOUT, closed_by_server(&mut ws))
		.await
		.map_err(|_| anyhow!("server kept the oversized connection open"))?;
	assert!(closed);

	tokio::time::timeout(READ_TIMEOUT, async {
		while state.gateway.presence().is_online(&u1) {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.map_err(|_| anyhow!("{u1} stayed online after the oversized message"))?;

	Ok(())
}
