#![forbid(unsafe_code)]

//! Per-connection realtime lifecycle.
//!
//! A `Session` exists only after the handshake produced an `AuthenticatedContext`, so
//! no event handler can run for an anonymous connection. `connect` joins the identity
//! room, registers presence and announces `userOnline`; `handle_event` consults the
//! session's rate limiter before any side effect; `disconnect` runs once and announces
//! `userOffline` only when this connection still owned the presence entry.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use natter_domain::{ConnectionHandle, Identity, UserId};
use natter_protocol::{
	ClientEvent, MessagePayload, PresenceChange, Receipt, ReceiptAck, SendMessage, ServerEvent, TypingStatus, TypingUpdate,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::server::handshake::AuthenticatedContext;
use crate::server::hub::ConnectionHub;
use crate::server::messages::validate_content;
use crate::server::presence::PresenceRegistry;
use crate::server::rate_limit::{EventRateLimiter, RateLimitPolicy};
use crate::util::time::rfc3339_now;

pub const ERROR_CODE_INVALID_EVENT: &str = "INVALID_EVENT";
pub const ERROR_CODE_INVALID_MESSAGE: &str = "INVALID_MESSAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Authenticated,
	Disconnected,
}

/// State owned by one live connection.
#[derive(Debug)]
pub struct Session {
	handle: ConnectionHandle,
	context: AuthenticatedContext,
	limiter: EventRateLimiter,
	state: ConnectionState,
}

impl Session {
	pub fn handle(&self) -> ConnectionHandle {
		self.handle
	}

	pub fn identity(&self) -> &Identity {
		&self.context.identity
	}

	pub fn user_id(&self) -> &UserId {
		&self.context.identity.id
	}

	pub fn state(&self) -> ConnectionState {
		self.state
	}
}

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
	/// Queued for this many connections.
	Delivered(usize),
	/// Target identity has no registered connection.
	NotReachable,
	/// Dropped by the session's rate limiter.
	RateLimited,
	/// Payload failed validation; an `error` event went back to the sender.
	Rejected,
	/// Session already disconnected.
	Ignored,
}

#[derive(Debug)]
pub struct RealtimeGateway {
	presence: Arc<PresenceRegistry>,
	hub: ConnectionHub,
	policy: RateLimitPolicy,
	next_handle: AtomicU64,
}

impl RealtimeGateway {
	pub fn new(presence: Arc<PresenceRegistry>, hub: ConnectionHub, policy: RateLimitPolicy) -> Self {
		Self {
			presence,
			hub,
			policy,
			next_handle: AtomicU64::new(1),
		}
	}

	pub fn presence(&self) -> &Arc<PresenceRegistry> {
		&self.presence
	}

	/// Enter `Authenticated`: join the identity room, register presence, announce online.
	pub async fn connect(&self, context: AuthenticatedContext) -> (Session, mpsc::Receiver<ServerEvent>) {
		let handle = ConnectionHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
		let user_id = context.identity.id.clone();

		let rx = self.hub.attach(handle, user_id.clone()).await;

		if let Some(prev) = self.presence.register(user_id.clone(), handle)
			&& prev != handle
		{
			info!(user_id = %user_id, %prev, %handle, "realtime: newer connection supersedes registered one");
			metrics::counter!("natter_server_presence_superseded_total").increment(1);
		}

		self.hub
			.broadcast_except(
				handle,
				ServerEvent::UserOnline(PresenceChange {
					user_id: user_id.clone(),
					timestamp: rfc3339_now(),
				}),
			)
			.await;

		metrics::gauge!("natter_server_active_connections").increment(1.0);
		info!(%handle, user_id = %user_id, "realtime: connection authenticated");

		let session = Session {
			handle,
			context,
			limiter: EventRateLimiter::new(self.policy),
			state: ConnectionState::Authenticated,
		};
		(session, rx)
	}

	/// Dispatch one inbound event. Events over the session's limit are dropped.
	pub async fn handle_event(&self, session: &mut Session, event: ClientEvent) -> EventOutcome {
		if session.state != ConnectionState::Authenticated {
			return EventOutcome::Ignored;
		}

		let event_name = event.name();
		metrics::counter!("natter_server_events_in_total", "event" => event_name).increment(1);

		if let Err(limited) = session.limiter.check(Some(&session.context.identity.id), Instant::now()) {
			metrics::counter!("natter_server_events_rate_limited_total", "event" => event_name).increment(1);
			debug!(
				handle = %session.handle,
				user_id = %session.user_id(),
				event = event_name,
				retry_after_ms = limited.retry_after.as_millis() as u64,
				"realtime: event dropped by rate limiter"
			);
			return EventOutcome::RateLimited;
		}

		match event {
			ClientEvent::Typing(update) => self.relay_typing(session, update).await,
			ClientEvent::MessageDelivered(ack) => {
				self.broadcast_receipt(session, ack, ServerEvent::MessageDelivered).await
			}
			ClientEvent::MessageRead(ack) => self.broadcast_receipt(session, ack, ServerEvent::MessageRead).await,
			ClientEvent::SendMessage(msg) => self.relay_live_message(session, msg).await,
		}
	}

	/// Answer a frame that did not decode. Charged to the session's limiter like any
	/// other event; the reply never echoes decoder output.
	pub async fn reject_frame(&self, session: &mut Session) -> EventOutcome {
		if session.state != ConnectionState::Authenticated {
			return EventOutcome::Ignored;
		}

		if session
			.limiter
			.check(Some(&session.context.identity.id), Instant::now())
			.is_err()
		{
			metrics::counter!("natter_server_events_rate_limited_total", "event" => "invalid").increment(1);
			return EventOutcome::RateLimited;
		}

		self.send_error(session, ERROR_CODE_INVALID_EVENT, "Invalid event").await;
		EventOutcome::Rejected
	}

	/// Queue an `error` event for this session only.
	pub async fn send_error(&self, session: &Session, code: &str, message: impl Into<String>) -> bool {
		self.hub.send_to(session.handle, ServerEvent::error(code, message)).await
	}

	/// Enter `Disconnected`. Returns whether `userOffline` was broadcast.
	///
	/// Runs its side effects once; later calls are no-ops.
	pub async fn disconnect(&self, session: &mut Session) -> bool {
		if session.state == ConnectionState::Disconnected {
			return false;
		}
		session.state = ConnectionState::Disconnected;

		let handle = session.handle;
		let user_id = session.context.identity.id.clone();

		self.hub.detach(handle).await;
		metrics::gauge!("natter_server_active_connections").decrement(1.0);

		if !self.presence.unregister_if(&user_id, handle) {
			info!(%handle, user_id = %user_id, "realtime: superseded connection closed; identity stays online");
			return false;
		}

		self.hub
			.broadcast_except(
				handle,
				ServerEvent::UserOffline(PresenceChange {
					user_id: user_id.clone(),
					timestamp: rfc3339_now(),
				}),
			)
			.await;

		info!(%handle, user_id = %user_id, "realtime: connection closed");
		true
	}

	/// Push a persisted message to every live connection of its receiver.
	pub async fn relay_persisted_message(&self, payload: MessagePayload) -> usize {
		let receiver = payload.receiver_id.clone();
		let delivered = self.hub.send_to_room(&receiver, ServerEvent::ReceiveMessage(payload)).await;
		debug!(receiver_id = %receiver, delivered, "realtime: relayed persisted message");
		delivered
	}

	/// Identities with a registered connection.
	pub fn online_users(&self) -> HashSet<UserId> {
		self.presence.all_identities()
	}

	async fn relay_typing(&self, session: &Session, update: TypingUpdate) -> EventOutcome {
		let Some(target) = self.presence.lookup(&update.receiver_id) else {
			return EventOutcome::NotReachable;
		};

		let event = ServerEvent::TypingStatus(TypingStatus {
			user_id: session.user_id().clone(),
			is_typing: update.is_typing,
		});

		if self.hub.send_to(target, event).await {
			EventOutcome::Delivered(1)
		} else {
			EventOutcome::Delivered(0)
		}
	}

	async fn broadcast_receipt(
		&self,
		session: &Session,
		ack: ReceiptAck,
		wrap: fn(Receipt) -> ServerEvent,
	) -> EventOutcome {
		let event = wrap(Receipt {
			message_id: ack.message_id,
			user_id: session.user_id().clone(),
		});
		EventOutcome::Delivered(self.hub.broadcast_except(session.handle, event).await)
	}

	/// Live-only relay to the receiver's registered connection; nothing is persisted here.
	async fn relay_live_message(&self, session: &Session, msg: SendMessage) -> EventOutcome {
		let (text, image) = match validate_content(msg.text.as_deref(), msg.image.as_deref()) {
			Ok(content) => content,
			Err(e) => {
				self.send_error(session, ERROR_CODE_INVALID_MESSAGE, e.to_string()).await;
				return EventOutcome::Rejected;
			}
		};

		let Some(target) = self.presence.lookup(&msg.receiver_id) else {
			return EventOutcome::NotReachable;
		};

		let now = rfc3339_now();
		let event = ServerEvent::ReceiveMessage(MessagePayload {
			id: None,
			sender_id: session.user_id().clone(),
			receiver_id: msg.receiver_id,
			text,
			image,
			created_at: now.clone(),
			updated_at: now,
		});

		if self.hub.send_to(target, event).await {
			EventOutcome::Delivered(1)
		} else {
			EventOutcome::Delivered(0)
		}
	}
}
