#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use natter_protocol::{ClientEvent, DEFAULT_MAX_FRAME_SIZE, decode_frame, encode_frame};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::server::gateway::{RealtimeGateway, Session};
use crate::server::handshake::AuthenticatedContext;

/// Per-connection transport settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	/// Largest inbound message or frame; bigger ones close the socket.
	pub max_frame_bytes: usize,
	pub ping_interval: Duration,
	/// Close after this long without any inbound frame (pongs included).
	pub ping_timeout: Duration,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
			ping_interval: Duration::from_secs(25),
			ping_timeout: Duration::from_secs(60),
		}
	}
}

/// Drive one authenticated WebSocket until it closes, then run the disconnect path.
pub async fn handle_connection(
	ws: WebSocket,
	gateway: Arc<RealtimeGateway>,
	context: AuthenticatedContext,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	metrics::counter!("natter_server_connections_total").increment(1);

	let (mut session, mut outbound) = gateway.connect(context).await;
	let conn_id = session.handle();
	let (mut sink, mut stream) = ws.split();

	let mut ping = tokio::time::interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);
	ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
	let mut last_inbound = Instant::now();

	let result: anyhow::Result<()> = loop {
		let idle_deadline = last_inbound + settings.ping_timeout;

		tokio::select! {
			incoming = stream.next() => {
				let msg = match incoming {
					Some(Ok(msg)) => msg,
					Some(Err(e)) => break Err(anyhow!(e).context("websocket read failed")),
					None => break Ok(()),
				};
				last_inbound = Instant::now();

				match msg {
					Message::Text(text) => {
						metrics::counter!("natter_server_frames_in_total").increment(1);
						handle_text(&gateway, &mut session, text.as_str(), &settings).await;
					}
					Message::Binary(bytes) => {
						debug!(%conn_id, len = bytes.len(), "ignoring binary frame");
					}
					Message::Close(frame) => {
						debug!(%conn_id, ?frame, "client closed connection");
						break Ok(());
					}
					Message::Ping(_) | Message::Pong(_) => {}
				}
			}

			event = outbound.recv() => {
				let Some(event) = event else {
					break Ok(());
				};

				match encode_frame(&event, settings.max_frame_bytes) {
					Ok(text) => {
						if let Err(e) = sink.send(Message::Text(text.into())).await {
							break Err(anyhow!(e).context("websocket write failed"));
						}
						metrics::counter!("natter_server_events_out_total", "event" => event.name()).increment(1);
					}
					Err(e) => {
						warn!(%conn_id, event = event.name(), error = %e, "dropping unencodable outbound event");
					}
				}
			}

			_ = ping.tick() => {
				if let Err(e) = sink.send(Message::Ping(Default::default())).await {
					break Err(anyhow!(e).context("websocket ping failed"));
				}
			}

			_ = tokio::time::sleep_until(idle_deadline) => {
				info!(%conn_id, timeout_secs = settings.ping_timeout.as_secs(), "closing idle connection");
				metrics::counter!("natter_server_ping_timeouts_total").increment(1);
				let _ = sink.send(Message::Close(None)).await;
				break Ok(());
			}
		}
	};

	gateway.disconnect(&mut session).await;
	let _ = sink.close().await;

	result
}

async fn handle_text(gateway: &RealtimeGateway, session: &mut Session, text: &str, settings: &ConnectionSettings) {
	match decode_frame::<ClientEvent>(text, settings.max_frame_bytes) {
		Ok(event) => {
			let name = event.name();
			let outcome = gateway.handle_event(session, event).await;
			debug!(conn_id = %session.handle(), event = name, ?outcome, "handled event");
		}
		Err(e) => {
			metrics::counter!("natter_server_frame_decode_errors_total").increment(1);
			let outcome = gateway.reject_frame(session).await;
			debug!(conn_id = %session.handle(), error = %e, ?outcome, "rejected undecodable frame");
		}
	}
}
