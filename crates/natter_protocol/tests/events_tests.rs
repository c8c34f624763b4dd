use natter_domain::{MessageId, UserId};
use natter_protocol::{
	ClientEvent, DEFAULT_MAX_FRAME_SIZE, MessagePayload, PresenceChange, Receipt, ReceiptAck, SendMessage, ServerEvent,
	TypingStatus, TypingUpdate, decode_frame, encode_frame_default,
};
use proptest::prelude::*;
use serde_json::{Value, json};

fn uid(s: &str) -> UserId {
	UserId::new(s).expect("valid UserId")
}

fn encode_value(ev: &ServerEvent) -> Value {
	let text = encode_frame_default(ev).expect("encode");
	serde_json::from_str(&text).expect("valid json")
}

#[test]
fn decodes_typing_from_client_shape() {
	let ev: ClientEvent = decode_frame(
		r#"{"event":"typing","data":{"receiverId":"u1","isTyping":true}}"#,
		DEFAULT_MAX_FRAME_SIZE,
	)
	.expect("decode");

	assert_eq!(
		ev,
		ClientEvent::Typing(TypingUpdate {
			receiver_id: uid("u1"),
			is_typing: true,
		})
	);
	assert_eq!(ev.name(), "typing");
}

#[test]
fn decodes_send_message_with_optional_fields() {
	let ev: ClientEvent =
		decode_frame(r#"{"event":"sendMessage","data":{"receiverId":"u2","text":"hi"}}"#, DEFAULT_MAX_FRAME_SIZE)
			.expect("decode");

	assert_eq!(
		ev,
		ClientEvent::SendMessage(SendMessage {
			receiver_id: uid("u2"),
			text: Some("hi".to_string()),
			image: None,
		})
	);
}

#[test]
fn decodes_receipts() {
	let delivered: ClientEvent =
		decode_frame(r#"{"event":"messageDelivered","data":{"messageId":"m1"}}"#, DEFAULT_MAX_FRAME_SIZE).expect("decode");
	let read: ClientEvent =
		decode_frame(r#"{"event":"messageRead","data":{"messageId":"m1"}}"#, DEFAULT_MAX_FRAME_SIZE).expect("decode");

	let ack = ReceiptAck {
		message_id: "m1".to_string(),
	};
	assert_eq!(delivered, ClientEvent::MessageDelivered(ack.clone()));
	assert_eq!(read, ClientEvent::MessageRead(ack));
}

#[test]
fn rejects_empty_receiver_id() {
	let res = decode_frame::<ClientEvent>(
		r#"{"event":"typing","data":{"receiverId":"  ","isTyping":true}}"#,
		DEFAULT_MAX_FRAME_SIZE,
	);
	assert!(res.is_err());
}

#[test]
fn server_events_use_wire_names() {
	let online = encode_value(&ServerEvent::UserOnline(PresenceChange {
		user_id: uid("u1"),
		timestamp: "2026-01-01T00:00:00.000Z".to_string(),
	}));
	assert_eq!(
		online,
		json!({"event": "userOnline", "data": {"userId": "u1", "timestamp": "2026-01-01T00:00:00.000Z"}})
	);

	let typing = encode_value(&ServerEvent::TypingStatus(TypingStatus {
		user_id: uid("u2"),
		is_typing: false,
	}));
	assert_eq!(typing, json!({"event": "typingStatus", "data": {"userId": "u2", "isTyping": false}}));

	let read = encode_value(&ServerEvent::MessageRead(Receipt {
		message_id: "m9".to_string(),
		user_id: uid("u3"),
	}));
	assert_eq!(read, json!({"event": "messageRead", "data": {"messageId": "m9", "userId": "u3"}}));

	let err = encode_value(&ServerEvent::error("INVALID_EVENT", "bad frame"));
	assert_eq!(
		err,
		json!({"event": "error", "data": {"message": "bad frame", "code": "INVALID_EVENT"}})
	);
}

#[test]
fn receive_message_uses_underscore_id_and_omits_missing_fields() {
	let id = MessageId::new_v4();
	let persisted = encode_value(&ServerEvent::ReceiveMessage(MessagePayload {
		id: Some(id),
		sender_id: uid("u1"),
		receiver_id: uid("u2"),
		text: Some("hello".to_string()),
		image: None,
		created_at: "t0".to_string(),
		updated_at: "t0".to_string(),
	}));

	let data = &persisted["data"];
	assert_eq!(persisted["event"], "receiveMessage");
	assert_eq!(data["_id"], id.to_string());
	assert_eq!(data["senderId"], "u1");
	assert_eq!(data["receiverId"], "u2");
	assert_eq!(data["text"], "hello");
	assert!(data.get("image").is_none());

	let live_only = encode_value(&ServerEvent::ReceiveMessage(MessagePayload {
		id: None,
		sender_id: uid("u1"),
		receiver_id: uid("u2"),
		text: None,
		image: Some("https://img.example/x.png".to_string()),
		created_at: "t1".to_string(),
		updated_at: "t1".to_string(),
	}));
	assert!(live_only["data"].get("_id").is_none());
	assert!(live_only["data"].get("text").is_none());
}

proptest! {
	#[test]
	fn decoding_arbitrary_text_never_panics(s in ".{0,256}") {
		let _ = decode_frame::<ClientEvent>(&s, DEFAULT_MAX_FRAME_SIZE);
	}
}
