#![forbid(unsafe_code)]

use std::str::FromStr;

use anyhow::{Context, anyhow, bail};
use natter_domain::{Email, MessageId, UserId, Username};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::util::time::unix_ms_now;

/// bcrypt output length; anything shorter was not produced by the hasher.
pub const MIN_PASSWORD_HASH_LEN: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
	pub id: UserId,
	pub email: Email,
	pub username: Username,
	pub password_hash: String,
	pub created_at_ms: i64,
	pub updated_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct NewUser {
	pub email: Email,
	pub username: Username,
	pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
	pub username: Option<Username>,
	pub password_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
	pub id: MessageId,
	pub sender_id: UserId,
	pub receiver_id: UserId,
	pub text: Option<String>,
	pub image: Option<String>,
	pub created_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
	pub sender_id: UserId,
	pub receiver_id: UserId,
	pub text: Option<String>,
	pub image: Option<String>,
}

/// Failures callers branch on. Travels inside `anyhow::Error`; recover it with `downcast_ref`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
	#[error("email or username already registered")]
	DuplicateUser,
}

/// Whether `e` carries [`StoreError::DuplicateUser`].
pub fn is_duplicate_user(e: &anyhow::Error) -> bool {
	e.downcast_ref::<StoreError>() == Some(&StoreError::DuplicateUser)
}

fn user_write_error(e: sqlx::Error, what: &'static str) -> anyhow::Error {
	if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
		return StoreError::DuplicateUser.into();
	}
	anyhow::Error::new(e).context(what)
}

/// Account and message persistence.
#[async_trait::async_trait]
pub trait ChatStore: Send + Sync {
	/// Fails with [`StoreError::DuplicateUser`] when the email or username is taken.
	async fn create_user(&self, new: NewUser) -> anyhow::Result<UserRecord>;

	async fn user_by_id(&self, id: &UserId) -> anyhow::Result<Option<UserRecord>>;

	async fn user_by_email(&self, email: &Email) -> anyhow::Result<Option<UserRecord>>;

	/// Whether any account already uses `email` or `username`.
	async fn user_exists(&self, email: &Email, username: &Username) -> anyhow::Result<bool>;

	async fn username_taken_by_other(&self, username: &Username, id: &UserId) -> anyhow::Result<bool>;

	/// Apply `update`; `None` when the user does not exist. A username another account
	/// holds fails with [`StoreError::DuplicateUser`].
	async fn update_user(&self, id: &UserId, update: UserUpdate) -> anyhow::Result<Option<UserRecord>>;

	/// Every user except `id`, ordered by username.
	async fn users_except(&self, id: &UserId) -> anyhow::Result<Vec<UserRecord>>;

	async fn insert_message(&self, new: NewMessage) -> anyhow::Result<MessageRecord>;

	/// Messages exchanged between `a` and `b`, oldest first.
	async fn conversation(&self, a: &UserId, b: &UserId) -> anyhow::Result<Vec<MessageRecord>>;

	/// Users `user` exchanged messages with, most recent conversation first.
	async fn chat_partner_ids(&self, user: &UserId) -> anyhow::Result<Vec<UserId>>;
}

fn ensure_hashed(password_hash: &str) -> anyhow::Result<()> {
	if password_hash.len() < MIN_PASSWORD_HASH_LEN {
		bail!("refusing to store a password that is not hashed");
	}
	Ok(())
}

#[derive(Debug, Default)]
struct MemoryState {
	users: Vec<UserRecord>,
	/// Insertion order is chronological order.
	messages: Vec<MessageRecord>,
}

/// Process-local store; the default when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryStore {
	inner: Mutex<MemoryState>,
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl ChatStore for InMemoryStore {
	async fn create_user(&self, new: NewUser) -> anyhow::Result<UserRecord> {
		ensure_hashed(&new.password_hash)?;

		let mut guard = self.inner.lock().await;
		if guard.users.iter().any(|u| u.email == new.email || u.username == new.username) {
			return Err(StoreError::DuplicateUser.into());
		}

		let now = unix_ms_now();
		let user = UserRecord {
			id: UserId::generate(),
			email: new.email,
			username: new.username,
			password_hash: new.password_hash,
			created_at_ms: now,
			updated_at_ms: now,
		};
		guard.users.push(user.clone());
		Ok(user)
	}

	async fn user_by_id(&self, id: &UserId) -> anyhow::Result<Option<UserRecord>> {
		let guard = self.inner.lock().await;
		Ok(guard.users.iter().find(|u| &u.id == id).cloned())
	}

	async fn user_by_email(&self, email: &Email) -> anyhow::Result<Option<UserRecord>> {
		let guard = self.inner.lock().await;
		Ok(guard.users.iter().find(|u| &u.email == email).cloned())
	}

	async fn user_exists(&self, email: &Email, username: &Username) -> anyhow::Result<bool> {
		let guard = self.inner.lock().await;
		Ok(guard.users.iter().any(|u| &u.email == email || &u.username == username))
	}

	async fn username_taken_by_other(&self, username: &Username, id: &UserId) -> anyhow::Result<bool> {
		let guard = self.inner.lock().await;
		Ok(guard.users.iter().any(|u| &u.username == username && &u.id != id))
	}

	async fn update_user(&self, id: &UserId, update: UserUpdate) -> anyhow::Result<Option<UserRecord>> {
		if let Some(hash) = update.password_hash.as_deref() {
			ensure_hashed(hash)?;
		}

		let mut guard = self.inner.lock().await;
		if let Some(username) = update.username.as_ref()
			&& guard.users.iter().any(|u| &u.username == username && &u.id != id)
		{
			return Err(StoreError::DuplicateUser.into());
		}
		let Some(user) = guard.users.iter_mut().find(|u| &u.id == id) else {
			return Ok(None);
		};

		if let Some(username) = update.username {
			user.username = username;
		}
		if let Some(hash) = update.password_hash {
			user.password_hash = hash;
		}
		user.updated_at_ms = unix_ms_now();
		Ok(Some(user.clone()))
	}

	async fn users_except(&self, id: &UserId) -> anyhow::Result<Vec<UserRecord>> {
		let guard = self.inner.lock().await;
		let mut users: Vec<UserRecord> = guard.users.iter().filter(|u| &u.id != id).cloned().collect();
		users.sort_by(|a, b| a.username.as_str().cmp(b.username.as_str()));
		Ok(users)
	}

	async fn insert_message(&self, new: NewMessage) -> anyhow::Result<MessageRecord> {
		let msg = MessageRecord {
			id: MessageId::new_v4(),
			sender_id: new.sender_id,
			receiver_id: new.receiver_id,
			text: new.text,
			image: new.image,
			created_at_ms: unix_ms_now(),
		};
		self.inner.lock().await.messages.push(msg.clone());
		Ok(msg)
	}

	async fn conversation(&self, a: &UserId, b: &UserId) -> anyhow::Result<Vec<MessageRecord>> {
		let guard = self.inner.lock().await;
		Ok(guard
			.messages
			.iter()
			.filter(|m| (&m.sender_id == a && &m.receiver_id == b) || (&m.sender_id == b && &m.receiver_id == a))
			.cloned()
			.collect())
	}

	async fn chat_partner_ids(&self, user: &UserId) -> anyhow::Result<Vec<UserId>> {
		let guard = self.inner.lock().await;
		let mut partners: Vec<UserId> = Vec::new();
		for m in guard.messages.iter().rev() {
			let partner = if &m.sender_id == user {
				&m.receiver_id
			} else if &m.receiver_id == user {
				&m.sender_id
			} else {
				continue;
			};
			if partner != user && !partners.contains(partner) {
				partners.push(partner.clone());
			}
		}
		Ok(partners)
	}
}

/// `sqlx`-backed store for `sqlite:` and `postgres:` URLs.
#[derive(Clone)]
pub struct SqlStore {
	backend: SqlBackend,
}

#[derive(Clone)]
enum SqlBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
}

type UserRow = (String, String, String, String, i64, i64);
type MessageRow = (String, String, String, Option<String>, Option<String>, i64);

fn user_from_row(row: UserRow) -> anyhow::Result<UserRecord> {
	let (id, email, username, password_hash, created_at_ms, updated_at_ms) = row;
	Ok(UserRecord {
		id: UserId::new(id).context("stored user id")?,
		email: Email::parse(&email).context("stored email")?,
		username: Username::parse(&username).context("stored username")?,
		password_hash,
		created_at_ms,
		updated_at_ms,
	})
}

fn message_from_row(row: MessageRow) -> anyhow::Result<MessageRecord> {
	let (id, sender_id, receiver_id, text, image, created_at_ms) = row;
	Ok(MessageRecord {
		id: MessageId::from_str(&id).context("stored message id")?,
		sender_id: UserId::new(sender_id).context("stored sender id")?,
		receiver_id: UserId::new(receiver_id).context("stored receiver id")?,
		text,
		image,
		created_at_ms,
	})
}

const USER_COLUMNS: &str = "id, email, username, password_hash, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, image, created_at";

impl SqlStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			let opts = SqliteConnectOptions::from_str(database_url)
				.context("parse sqlite url")?
				.create_if_missing(true);
			// Every `:memory:` connection is its own database.
			let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
			let pool = SqlitePoolOptions::new()
				.max_connections(max_connections)
				.connect_with(opts)
				.await
				.context("connect sqlite")?;
			sqlx::migrate!("migrations/sqlite")
				.run(&pool)
				.await
				.context("run sqlite migrations")?;

			Ok(Self {
				backend: SqlBackend::Sqlite(pool),
			})
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = PgPoolOptions::new()
				.connect(database_url)
				.await
				.context("connect postgres")?;
			sqlx::migrate!("migrations/postgres")
				.run(&pool)
				.await
				.context("run postgres migrations")?;

			Ok(Self {
				backend: SqlBackend::Postgres(pool),
			})
		} else {
			Err(anyhow!("unsupported database_url (use sqlite: or postgres:)"))
		}
	}

	async fn fetch_user(&self, column: &str, value: &str) -> anyhow::Result<Option<UserRecord>> {
		let row: Option<UserRow> = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?"))
				.bind(value)
				.fetch_optional(pool)
				.await
				.context("select user (sqlite)")?,
			SqlBackend::Postgres(pool) => {
				sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1"))
					.bind(value)
					.fetch_optional(pool)
					.await
					.context("select user (postgres)")?
			}
		};
		row.map(user_from_row).transpose()
	}
}

#[async_trait::async_trait]
impl ChatStore for SqlStore {
	async fn create_user(&self, new: NewUser) -> anyhow::Result<UserRecord> {
		ensure_hashed(&new.password_hash)?;

		let now = unix_ms_now();
		let user = UserRecord {
			id: UserId::generate(),
			email: new.email,
			username: new.username,
			password_hash: new.password_hash,
			created_at_ms: now,
			updated_at_ms: now,
		};

		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query(&format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"))
					.bind(user.id.as_str())
					.bind(user.email.as_str())
					.bind(user.username.as_str())
					.bind(&user.password_hash)
					.bind(user.created_at_ms)
					.bind(user.updated_at_ms)
					.execute(pool)
					.await
					.map_err(|e| user_write_error(e, "insert user (sqlite)"))?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query(&format!("INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"))
					.bind(user.id.as_str())
					.bind(user.email.as_str())
					.bind(user.username.as_str())
					.bind(&user.password_hash)
					.bind(user.created_at_ms)
					.bind(user.updated_at_ms)
					.execute(pool)
					.await
					.map_err(|e| user_write_error(e, "insert user (postgres)"))?;
			}
		}

		Ok(user)
	}

	async fn user_by_id(&self, id: &UserId) -> anyhow::Result<Option<UserRecord>> {
		self.fetch_user("id", id.as_str()).await
	}

	async fn user_by_email(&self, email: &Email) -> anyhow::Result<Option<UserRecord>> {
		self.fetch_user("email", email.as_str()).await
	}

	async fn user_exists(&self, email: &Email, username: &Username) -> anyhow::Result<bool> {
		let row: (i64,) = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ? OR username = ?")
				.bind(email.as_str())
				.bind(username.as_str())
				.fetch_one(pool)
				.await
				.context("count users (sqlite)")?,
			SqlBackend::Postgres(pool) => sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = $1 OR username = $2")
				.bind(email.as_str())
				.bind(username.as_str())
				.fetch_one(pool)
				.await
				.context("count users (postgres)")?,
		};
		Ok(row.0 > 0)
	}

	async fn username_taken_by_other(&self, username: &Username, id: &UserId) -> anyhow::Result<bool> {
		let row: (i64,) = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = ? AND id <> ?")
				.bind(username.as_str())
				.bind(id.as_str())
				.fetch_one(pool)
				.await
				.context("count usernames (sqlite)")?,
			SqlBackend::Postgres(pool) => sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = $1 AND id <> $2")
				.bind(username.as_str())
				.bind(id.as_str())
				.fetch_one(pool)
				.await
				.context("count usernames (postgres)")?,
		};
		Ok(row.0 > 0)
	}

	async fn update_user(&self, id: &UserId, update: UserUpdate) -> anyhow::Result<Option<UserRecord>> {
		if let Some(hash) = update.password_hash.as_deref() {
			ensure_hashed(hash)?;
		}

		let Some(mut user) = self.user_by_id(id).await? else {
			return Ok(None);
		};
		if let Some(username) = update.username {
			user.username = username;
		}
		if let Some(hash) = update.password_hash {
			user.password_hash = hash;
		}
		user.updated_at_ms = unix_ms_now();

		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query("UPDATE users SET username = ?, password_hash = ?, updated_at = ? WHERE id = ?")
					.bind(user.username.as_str())
					.bind(&user.password_hash)
					.bind(user.updated_at_ms)
					.bind(user.id.as_str())
					.execute(pool)
					.await
					.map_err(|e| user_write_error(e, "update user (sqlite)"))?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query("UPDATE users SET username = $1, password_hash = $2, updated_at = $3 WHERE id = $4")
					.bind(user.username.as_str())
					.bind(&user.password_hash)
					.bind(user.updated_at_ms)
					.bind(user.id.as_str())
					.execute(pool)
					.await
					.map_err(|e| user_write_error(e, "update user (postgres)"))?;
			}
		}

		Ok(Some(user))
	}

	async fn users_except(&self, id: &UserId) -> anyhow::Result<Vec<UserRecord>> {
		let rows: Vec<UserRow> = match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id <> ? ORDER BY username"))
					.bind(id.as_str())
					.fetch_all(pool)
					.await
					.context("select users (sqlite)")?
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id <> $1 ORDER BY username"))
					.bind(id.as_str())
					.fetch_all(pool)
					.await
					.context("select users (postgres)")?
			}
		};
		rows.into_iter().map(user_from_row).collect()
	}

	async fn insert_message(&self, new: NewMessage) -> anyhow::Result<MessageRecord> {
		let msg = MessageRecord {
			id: MessageId::new_v4(),
			sender_id: new.sender_id,
			receiver_id: new.receiver_id,
			text: new.text,
			image: new.image,
			created_at_ms: unix_ms_now(),
		};
		let id = msg.id.to_string();

		match &self.backend {
			SqlBackend::Sqlite(pool) => {
				sqlx::query(&format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"))
					.bind(&id)
					.bind(msg.sender_id.as_str())
					.bind(msg.receiver_id.as_str())
					.bind(msg.text.as_deref())
					.bind(msg.image.as_deref())
					.bind(msg.created_at_ms)
					.execute(pool)
					.await
					.context("insert message (sqlite)")?;
			}
			SqlBackend::Postgres(pool) => {
				sqlx::query(&format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"))
					.bind(&id)
					.bind(msg.sender_id.as_str())
					.bind(msg.receiver_id.as_str())
					.bind(msg.text.as_deref())
					.bind(msg.image.as_deref())
					.bind(msg.created_at_ms)
					.execute(pool)
					.await
					.context("insert message (postgres)")?;
			}
		}

		Ok(msg)
	}

	async fn conversation(&self, a: &UserId, b: &UserId) -> anyhow::Result<Vec<MessageRecord>> {
		let rows: Vec<MessageRow> = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query_as(&format!(
				"SELECT {MESSAGE_COLUMNS} FROM messages \
				WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?) \
				ORDER BY seq ASC"
			))
			.bind(a.as_str())
			.bind(b.as_str())
			.bind(b.as_str())
			.bind(a.as_str())
			.fetch_all(pool)
			.await
			.context("select conversation (sqlite)")?,
			SqlBackend::Postgres(pool) => sqlx::query_as(&format!(
				"SELECT {MESSAGE_COLUMNS} FROM messages \
				WHERE (sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1) \
				ORDER BY seq ASC"
			))
			.bind(a.as_str())
			.bind(b.as_str())
			.fetch_all(pool)
			.await
			.context("select conversation (postgres)")?,
		};
		rows.into_iter().map(message_from_row).collect()
	}

	async fn chat_partner_ids(&self, user: &UserId) -> anyhow::Result<Vec<UserId>> {
		let rows: Vec<(String, i64)> = match &self.backend {
			SqlBackend::Sqlite(pool) => sqlx::query_as(
				"SELECT partner, MAX(seq) AS last_seq FROM ( \
					SELECT CASE WHEN sender_id = ? THEN receiver_id ELSE sender_id END AS partner, seq \
					FROM messages WHERE sender_id = ? OR receiver_id = ? \
				) m GROUP BY partner ORDER BY last_seq DESC",
			)
			.bind(user.as_str())
			.bind(user.as_str())
			.bind(user.as_str())
			.fetch_all(pool)
			.await
			.context("select chat partners (sqlite)")?,
			SqlBackend::Postgres(pool) => sqlx::query_as(
				"SELECT partner, MAX(seq) AS last_seq FROM ( \
					SELECT CASE WHEN sender_id = $1 THEN receiver_id ELSE sender_id END AS partner, seq \
					FROM messages WHERE sender_id = $1 OR receiver_id = $1 \
				) m GROUP BY partner ORDER BY last_seq DESC",
			)
			.bind(user.as_str())
			.fetch_all(pool)
			.await
			.context("select chat partners (postgres)")?,
		};

		rows.into_iter()
			.filter(|(partner, _)| partner != user.as_str())
			.map(|(partner, _)| UserId::new(partner).context("stored partner id"))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn uid(s: &str) -> UserId {
		UserId::new(s).unwrap()
	}

	fn hash() -> String {
		format!("$2b$04${}", "x".repeat(53))
	}

	fn new_user(name: &str) -> NewUser {
		NewUser {
			email: Email::parse(&format!("{name}@example.com")).unwrap(),
			username: Username::parse(name).unwrap(),
			password_hash: hash(),
		}
	}

	fn text(from: &UserId, to: &UserId, body: &str) -> NewMessage {
		NewMessage {
			sender_id: from.clone(),
			receiver_id: to.clone(),
			text: Some(body.to_string()),
			image: None,
		}
	}

	async fn exercise(store: &dyn ChatStore) {
		let alice = store.create_user(new_user("alice")).await.unwrap();
		let bob = store.create_user(new_user("bob")).await.unwrap();
		let carol = store.create_user(new_user("carol")).await.unwrap();

		assert_eq!(store.user_by_id(&alice.id).await.unwrap(), Some(alice.clone()));
		assert_eq!(store.user_by_email(&bob.email).await.unwrap().map(|u| u.id), Some(bob.id.clone()));
		assert!(store.user_by_id(&uid("nobody")).await.unwrap().is_none());

		let other_email = Email::parse("new@example.com").unwrap();
		assert!(store.user_exists(&other_email, &Username::parse("alice").unwrap()).await.unwrap());
		assert!(!store.user_exists(&other_email, &Username::parse("dave").unwrap()).await.unwrap());

		assert!(store.username_taken_by_other(&bob.username, &alice.id).await.unwrap());
		assert!(!store.username_taken_by_other(&alice.username, &alice.id).await.unwrap());

		let same_email = NewUser {
			username: Username::parse("alice2").unwrap(),
			..new_user("alice")
		};
		let err = store.create_user(same_email).await.unwrap_err();
		assert!(is_duplicate_user(&err), "{err:?}");
		let same_name = NewUser {
			email: Email::parse("other@example.com").unwrap(),
			..new_user("bob")
		};
		let err = store.create_user(same_name).await.unwrap_err();
		assert!(is_duplicate_user(&err), "{err:?}");

		let err = store
			.update_user(
				&alice.id,
				UserUpdate {
					username: Some(bob.username.clone()),
					password_hash: None,
				},
			)
			.await
			.unwrap_err();
		assert!(is_duplicate_user(&err), "{err:?}");

		let updated = store
			.update_user(
				&alice.id,
				UserUpdate {
					username: Some(Username::parse("alicia").unwrap()),
					password_hash: None,
				},
			)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(updated.username.as_str(), "alicia");
		assert_eq!(updated.password_hash, alice.password_hash);

		let names: Vec<String> = store
			.users_except(&alice.id)
			.await
			.unwrap()
			.into_iter()
			.map(|u| u.username.to_string())
			.collect();
		assert_eq!(names, vec!["bob".to_string(), "carol".to_string()]);

		let m1 = store.insert_message(text(&alice.id, &bob.id, "hi bob")).await.unwrap();
		store.insert_message(text(&carol.id, &alice.id, "hi alice")).await.unwrap();
		let m3 = store.insert_message(text(&bob.id, &alice.id, "hey")).await.unwrap();

		let convo = store.conversation(&bob.id, &alice.id).await.unwrap();
		assert_eq!(convo.iter().map(|m| m.id).collect::<Vec<_>>(), vec![m1.id, m3.id]);

		let partners = store.chat_partner_ids(&alice.id).await.unwrap();
		assert_eq!(partners, vec![bob.id.clone(), carol.id.clone()]);
		assert!(store.chat_partner_ids(&uid("nobody")).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn in_memory_store_behaves() {
		exercise(&InMemoryStore::new()).await;
	}

	#[tokio::test]
	async fn sqlite_store_behaves() {
		let store = SqlStore::connect("sqlite::memory:").await.unwrap();
		exercise(&store).await;
	}

	#[tokio::test]
	async fn unhashed_passwords_are_refused() {
		let store = InMemoryStore::new();
		let mut user = new_user("alice");
		user.password_hash = "plaintext".to_string();
		assert!(store.create_user(user).await.is_err());

		let ok = store.create_user(new_user("bob")).await.unwrap();
		let res = store
			.update_user(
				&ok.id,
				UserUpdate {
					username: None,
					password_hash: Some("short".to_string()),
				},
			)
			.await;
		assert!(res.is_err());
	}

	#[tokio::test]
	async fn duplicate_email_is_refused() {
		let store = InMemoryStore::new();
		store.create_user(new_user("alice")).await.unwrap();
		assert!(store.create_user(new_user("alice")).await.is_err());
	}
}
