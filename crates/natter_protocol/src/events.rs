#![forbid(unsafe_code)]

//! Realtime event vocabulary.
//!
//! Every frame is a JSON object `{"event": <name>, "data": {...}}`. Event and
//! field names are part of the client contract and must not change.

use natter_domain::{MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Events accepted from an authenticated client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
	SendMessage(SendMessage),
	Typing(TypingUpdate),
	MessageDelivered(ReceiptAck),
	MessageRead(ReceiptAck),
}

impl ClientEvent {
	/// Wire name, used for logs and metric labels.
	pub const fn name(&self) -> &'static str {
		match self {
			ClientEvent::SendMessage(_) => "sendMessage",
			ClientEvent::Typing(_) => "typing",
			ClientEvent::MessageDelivered(_) => "messageDelivered",
			ClientEvent::MessageRead(_) => "messageRead",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
	pub receiver_id: UserId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
	pub receiver_id: UserId,
	pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptAck {
	pub message_id: String,
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
	UserOnline(PresenceChange),
	UserOffline(PresenceChange),
	TypingStatus(TypingStatus),
	MessageDelivered(Receipt),
	MessageRead(Receipt),
	ReceiveMessage(MessagePayload),
	Error(ErrorPayload),
}

impl ServerEvent {
	pub const fn name(&self) -> &'static str {
		match self {
			ServerEvent::UserOnline(_) => "userOnline",
			ServerEvent::UserOffline(_) => "userOffline",
			ServerEvent::TypingStatus(_) => "typingStatus",
			ServerEvent::MessageDelivered(_) => "messageDelivered",
			ServerEvent::MessageRead(_) => "messageRead",
			ServerEvent::ReceiveMessage(_) => "receiveMessage",
			ServerEvent::Error(_) => "error",
		}
	}

	pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
		ServerEvent::Error(ErrorPayload {
			message: message.into(),
			code: code.into(),
		})
	}
}

/// `userOnline` / `userOffline` payload. `timestamp` is RFC 3339 in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
	pub user_id: UserId,
	pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
	pub user_id: UserId,
	pub is_typing: bool,
}

/// Delivery/read receipt: `user_id` is the identity that acknowledged the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
	pub message_id: String,
	pub user_id: UserId,
}

/// A direct message as clients render it.
///
/// `_id` is absent for live-only relays that never went through persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
	#[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
	pub id: Option<MessageId>,
	pub sender_id: UserId,
	pub receiver_id: UserId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub image: Option<String>,
	pub created_at: String,
	pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub message: String,
	pub code: String,
}
