#![forbid(unsafe_code)]

use std::sync::Arc;

use natter_domain::{Email, UserId, Username};
use natter_protocol::MessagePayload;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::server::gateway::RealtimeGateway;
use crate::server::store::{ChatStore, MessageRecord, NewMessage, UserRecord};
use crate::util::time::rfc3339_from_ms;

pub const MAX_TEXT_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum MessageError {
	#[error("Message must contain text or an image")]
	EmptyMessage,
	#[error("Message text cannot exceed {max} characters")]
	TextTooLong { max: usize },
	#[error("Receiver not found")]
	ReceiverNotFound,
	#[error(transparent)]
	Store(#[from] anyhow::Error),
}

/// Public view of another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
	#[serde(rename = "_id")]
	pub id: UserId,
	pub email: Email,
	pub username: Username,
}

impl From<UserRecord> for Contact {
	fn from(u: UserRecord) -> Self {
		Self {
			id: u.id,
			email: u.email,
			username: u.username,
		}
	}
}

/// Trim and check message content. Blank fields count as absent.
pub fn validate_content(
	text: Option<&str>,
	image: Option<&str>,
) -> Result<(Option<String>, Option<String>), MessageError> {
	let text = text.map(str::trim).filter(|t| !t.is_empty());
	let image = image.map(str::trim).filter(|i| !i.is_empty());

	if text.is_none() && image.is_none() {
		return Err(MessageError::EmptyMessage);
	}
	if let Some(t) = text
		&& t.chars().count() > MAX_TEXT_CHARS
	{
		return Err(MessageError::TextTooLong { max: MAX_TEXT_CHARS });
	}

	Ok((text.map(str::to_string), image.map(str::to_string)))
}

pub fn payload_from_record(rec: MessageRecord) -> MessagePayload {
	let ts = rfc3339_from_ms(rec.created_at_ms);
	MessagePayload {
		id: Some(rec.id),
		sender_id: rec.sender_id,
		receiver_id: rec.receiver_id,
		text: rec.text,
		image: rec.image,
		created_at: ts.clone(),
		updated_at: ts,
	}
}

/// Contacts, conversations and the persist-then-relay send path.
#[derive(Clone)]
pub struct MessageService {
	store: Arc<dyn ChatStore>,
	gateway: Arc<RealtimeGateway>,
}

impl MessageService {
	pub fn new(store: Arc<dyn ChatStore>, gateway: Arc<RealtimeGateway>) -> Self {
		Self { store, gateway }
	}

	pub async fn all_contacts(&self, me: &UserId) -> Result<Vec<Contact>, MessageError> {
		let users = self.store.users_except(me).await?;
		Ok(users.into_iter().map(Contact::from).collect())
	}

	pub async fn chat_contacts(&self, me: &UserId) -> Result<Vec<Contact>, MessageError> {
		let partner_ids = self.store.chat_partner_ids(me).await?;
		let mut contacts = Vec::with_capacity(partner_ids.len());
		for id in partner_ids {
			if let Some(user) = self.store.user_by_id(&id).await? {
				contacts.push(Contact::from(user));
			}
		}
		Ok(contacts)
	}

	pub async fn conversation(&self, me: &UserId, other: &UserId) -> Result<Vec<MessagePayload>, MessageError> {
		let records = self.store.conversation(me, other).await?;
		Ok(records.into_iter().map(payload_from_record).collect())
	}

	/// Persist, then relay `receiveMessage` to the receiver's live connections.
	pub async fn send(
		&self,
		me: &UserId,
		receiver: UserId,
		text: Option<&str>,
		image: Option<&str>,
	) -> Result<MessagePayload, MessageError> {
		let (text, image) = validate_content(text, image)?;

		if self.store.user_by_id(&receiver).await?.is_none() {
			return Err(MessageError::ReceiverNotFound);
		}

		let record = self
			.store
			.insert_message(NewMessage {
				sender_id: me.clone(),
				receiver_id: receiver,
				text,
				image,
			})
			.await?;
		metrics::counter!("natter_server_messages_persisted_total").increment(1);

		let payload = payload_from_record(record);
		let delivered = self.gateway.relay_persisted_message(payload.clone()).await;
		debug!(message_id = ?payload.id, delivered, "messages: stored and relayed");

		Ok(payload)
	}

	/// Identities with a live registered connection, sorted for stable output.
	pub fn online_users(&self) -> Vec<UserId> {
		let mut users: Vec<UserId> = self.gateway.online_users().into_iter().collect();
		users.sort();
		users
	}
}

#[cfg(test)]
mod tests {
	use natter_protocol::ServerEvent;

	use super::*;
	use crate::server::handshake::AuthenticatedContext;
	use crate::server::hub::{ConnectionHub, ConnectionHubConfig};
	use crate::server::presence::PresenceRegistry;
	use crate::server::rate_limit::RateLimitPolicy;
	use crate::server::store::{InMemoryStore, NewUser};

	async fn setup() -> (MessageService, Arc<RealtimeGateway>, UserRecord, UserRecord) {
		let store: Arc<dyn ChatStore> = Arc::new(InMemoryStore::new());
		let gateway = Arc::new(RealtimeGateway::new(
			Arc::new(PresenceRegistry::new()),
			ConnectionHub::new(ConnectionHubConfig::default()),
			RateLimitPolicy::default(),
		));

		let mk = |name: &str| NewUser {
			email: Email::parse(&format!("{name}@example.com")).unwrap(),
			username: Username::parse(name).unwrap(),
			password_hash: format!("$2b$04${}", "x".repeat(53)),
		};
		let alice = store.create_user(mk("alice")).await.unwrap();
		let bob = store.create_user(mk("bob")).await.unwrap();

		(MessageService::new(store, Arc::clone(&gateway)), gateway, alice, bob)
	}

	#[test]
	fn content_rules() {
		assert!(matches!(validate_content(None, None), Err(MessageError::EmptyMessage)));
		assert!(matches!(validate_content(Some("   "), Some("")), Err(MessageError::EmptyMessage)));
		assert!(matches!(
			validate_content(Some(&"x".repeat(2001)), None),
			Err(MessageError::TextTooLong { max: 2000 })
		));
		assert_eq!(
			validate_content(Some(&"é".repeat(2000)), None).unwrap().0.map(|t| t.chars().count()),
			Some(2000)
		);
		assert_eq!(
			validate_content(Some(" hi "), Some(" https://img/x.png ")).unwrap(),
			(Some("hi".to_string()), Some("https://img/x.png".to_string()))
		);
	}

	#[tokio::test]
	async fn send_persists_then_relays_to_receiver() {
		let (svc, gateway, alice, bob) = setup().await;
		let (_bob_session, mut bob_rx) = gateway
			.connect(AuthenticatedContext {
				identity: natter_domain::Identity::new(bob.id.clone(), bob.email.clone()),
			})
			.await;

		let sent = svc.send(&alice.id, bob.id.clone(), Some("hello"), None).await.unwrap();
		assert!(sent.id.is_some());

		assert_eq!(bob_rx.recv().await, Some(ServerEvent::ReceiveMessage(sent.clone())));

		let convo = svc.conversation(&bob.id, &alice.id).await.unwrap();
		assert_eq!(convo, vec![sent]);

		let contacts = svc.chat_contacts(&bob.id).await.unwrap();
		assert_eq!(contacts.into_iter().map(|c| c.id).collect::<Vec<_>>(), vec![alice.id.clone()]);
	}

	#[tokio::test]
	async fn send_to_unknown_receiver_fails_without_persisting() {
		let (svc, _gateway, alice, _bob) = setup().await;
		let ghost = UserId::new("ghost").unwrap();

		assert!(matches!(
			svc.send(&alice.id, ghost.clone(), Some("hi"), None).await,
			Err(MessageError::ReceiverNotFound)
		));
		assert!(svc.conversation(&alice.id, &ghost).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn all_contacts_excludes_caller() {
		let (svc, _gateway, alice, bob) = setup().await;
		let contacts = svc.all_contacts(&alice.id).await.unwrap();
		assert_eq!(contacts.len(), 1);
		assert_eq!(contacts[0].id, bob.id);
	}
}
