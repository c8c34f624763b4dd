#![forbid(unsafe_code)]

use std::sync::Arc;

use natter_domain::{Email, Identity, ParseIdError, UserId, Username};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::server::auth::{TokenError, TokenService};
use crate::server::password::{PasswordError, PasswordHasher};
use crate::server::store::{ChatStore, NewUser, UserRecord, UserUpdate, is_duplicate_user};
use crate::util::time::rfc3339_from_ms;

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("{0}")]
	Validation(String),
	#[error("{0}")]
	Conflict(&'static str),
	#[error("Invalid credentials")]
	InvalidCredentials,
	#[error("User not found")]
	NotFound,
	#[error("Nothing to update")]
	EmptyUpdate,
	#[error("token issue failed: {0}")]
	Token(#[from] TokenError),
	#[error(transparent)]
	Internal(#[from] anyhow::Error),
}

impl From<PasswordError> for AccountError {
	fn from(e: PasswordError) -> Self {
		match e {
			PasswordError::WeakInput { min_len } => {
				AccountError::Validation(format!("Password must be at least {min_len} characters long"))
			}
			PasswordError::Hash(msg) => AccountError::Internal(anyhow::anyhow!(msg)),
		}
	}
}

/// What clients see of their own account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
	pub user_id: UserId,
	pub email: Email,
	pub username: Username,
	pub created_at: String,
	pub updated_at: String,
}

impl From<UserRecord> for AccountProfile {
	fn from(u: UserRecord) -> Self {
		Self {
			user_id: u.id,
			email: u.email,
			username: u.username,
			created_at: rfc3339_from_ms(u.created_at_ms),
			updated_at: rfc3339_from_ms(u.updated_at_ms),
		}
	}
}

const SIGNUP_CONFLICT: &str = "User with this email or username already exists";
const USERNAME_CONFLICT: &str = "Username is already taken";

/// A store write lost a uniqueness race to a concurrent request; report it like the pre-check would.
fn conflict_or_internal(e: anyhow::Error, conflict: &'static str) -> AccountError {
	if is_duplicate_user(&e) {
		AccountError::Conflict(conflict)
	} else {
		AccountError::Internal(e)
	}
}

fn parse_email(raw: &str) -> Result<Email, AccountError> {
	Email::parse(raw).map_err(|_| AccountError::Validation("A valid email is required".to_string()))
}

fn parse_username(raw: &str) -> Result<Username, AccountError> {
	Username::parse(raw).map_err(|e| match e {
		ParseIdError::InvalidUsername { min, max } => {
			AccountError::Validation(format!("Username must be between {min} and {max} characters"))
		}
		_ => AccountError::Validation("Username is required".to_string()),
	})
}

/// Signup, login and profile updates.
#[derive(Clone)]
pub struct AccountService {
	store: Arc<dyn ChatStore>,
	hasher: PasswordHasher,
	tokens: Arc<TokenService>,
}

impl AccountService {
	pub fn new(store: Arc<dyn ChatStore>, hasher: PasswordHasher, tokens: Arc<TokenService>) -> Self {
		Self { store, hasher, tokens }
	}

	pub fn tokens(&self) -> &TokenService {
		&self.tokens
	}

	pub async fn register(&self, email: &str, username: &str, password: &str) -> Result<AccountProfile, AccountError> {
		let email = parse_email(email)?;
		let username = parse_username(username)?;
		self.hasher.check_strength(password)?;

		if self.store.user_exists(&email, &username).await? {
			return Err(AccountError::Conflict(SIGNUP_CONFLICT));
		}

		let password_hash = self.hasher.hash_async(password.to_string()).await?;
		let user = self
			.store
			.create_user(NewUser {
				email,
				username,
				password_hash,
			})
			.await
			.map_err(|e| conflict_or_internal(e, SIGNUP_CONFLICT))?;

		metrics::counter!("natter_server_accounts_registered_total").increment(1);
		info!(user_id = %user.id, "accounts: registered");
		Ok(AccountProfile::from(user))
	}

	/// Returns the profile and a freshly issued session token.
	pub async fn login(&self, email: &str, password: &str) -> Result<(AccountProfile, String), AccountError> {
		let Ok(email) = Email::parse(email) else {
			return Err(AccountError::InvalidCredentials);
		};

		let Some(user) = self.store.user_by_email(&email).await? else {
			return Err(AccountError::InvalidCredentials);
		};

		if !self
			.hasher
			.verify_async(password.to_string(), user.password_hash.clone())
			.await
		{
			warn!(user_id = %user.id, "accounts: password mismatch");
			return Err(AccountError::InvalidCredentials);
		}

		let identity = Identity::new(user.id.clone(), user.email.clone());
		let token = self.tokens.issue(&identity, self.tokens.default_ttl())?;

		info!(user_id = %user.id, "accounts: logged in");
		Ok((AccountProfile::from(user), token))
	}

	pub async fn update(
		&self,
		me: &UserId,
		username: Option<&str>,
		password: Option<&str>,
	) -> Result<AccountProfile, AccountError> {
		if username.is_none() && password.is_none() {
			return Err(AccountError::EmptyUpdate);
		}

		let username = username.map(parse_username).transpose()?;
		if let Some(name) = username.as_ref()
			&& self.store.username_taken_by_other(name, me).await?
		{
			return Err(AccountError::Conflict(USERNAME_CONFLICT));
		}

		let password_hash = match password {
			Some(p) => Some(self.hasher.hash_async(p.to_string()).await?),
			None => None,
		};

		let updated = self
			.store
			.update_user(me, UserUpdate { username, password_hash })
			.await
			.map_err(|e| conflict_or_internal(e, USERNAME_CONFLICT))?
			.ok_or(AccountError::NotFound)?;

		info!(user_id = %me, "accounts: profile updated");
		Ok(AccountProfile::from(updated))
	}

	pub async fn me(&self, me: &UserId) -> Result<AccountProfile, AccountError> {
		self.store
			.user_by_id(me)
			.await?
			.map(AccountProfile::from)
			.ok_or(AccountError::NotFound)
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use natter_domain::SecretString;

	use super::*;
	use crate::server::store::InMemoryStore;

	fn service() -> AccountService {
		AccountService::new(
			Arc::new(InMemoryStore::new()),
			PasswordHasher::new(4, 8),
			Arc::new(TokenService::new(Some(SecretString::new("secret")), Duration::from_secs(60))),
		)
	}

	#[tokio::test]
	async fn register_login_and_token_round_trip() {
		let svc = service();
		let profile = svc.register(" Alice@Example.com ", "alice", "password123").await.unwrap();
		assert_eq!(profile.email.as_str(), "alice@example.com");

		let (logged_in, token) = svc.login("alice@example.com", "password123").await.unwrap();
		assert_eq!(logged_in.user_id, profile.user_id);

		let verified = svc.tokens().verify(&token).unwrap();
		assert_eq!(verified.identity.id, profile.user_id);
	}

	#[tokio::test]
	async fn duplicate_email_or_username_conflicts() {
		let svc = service();
		svc.register("alice@example.com", "alice", "password123").await.unwrap();

		assert!(matches!(
			svc.register("alice@example.com", "other", "password123").await,
			Err(AccountError::Conflict(_))
		));
		assert!(matches!(
			svc.register("other@example.com", "alice", "password123").await,
			Err(AccountError::Conflict(_))
		));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn concurrent_signups_for_one_email_yield_one_conflict() {
		let svc = service();
		let (a, b) = tokio::join!(
			svc.register("race@example.com", "racer1", "password123"),
			svc.register("race@example.com", "racer2", "password123"),
		);

		let outcomes = [a, b];
		assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1, "{outcomes:?}");
		assert_eq!(
			outcomes
				.iter()
				.filter(|r| matches!(r, Err(AccountError::Conflict(SIGNUP_CONFLICT))))
				.count(),
			1,
			"{outcomes:?}"
		);
	}

	#[tokio::test]
	async fn validation_failures() {
		let svc = service();
		assert!(matches!(svc.register("nope", "alice", "password123").await, Err(AccountError::Validation(_))));
		assert!(matches!(svc.register("a@b.co", "al", "password123").await, Err(AccountError::Validation(_))));
		assert!(matches!(svc.register("a@b.co", "alice", "short").await, Err(AccountError::Validation(_))));
	}

	#[tokio::test]
	async fn wrong_password_and_unknown_email_look_the_same() {
		let svc = service();
		svc.register("alice@example.com", "alice", "password123").await.unwrap();

		let wrong = svc.login("alice@example.com", "password999").await.unwrap_err();
		let unknown = svc.login("bob@example.com", "password123").await.unwrap_err();
		assert_eq!(wrong.to_string(), unknown.to_string());
		assert!(matches!(wrong, AccountError::InvalidCredentials));
	}

	#[tokio::test]
	async fn update_checks_conflicts_and_rehashes() {
		let svc = service();
		let alice = svc.register("alice@example.com", "alice", "password123").await.unwrap();
		svc.register("bob@example.com", "bob", "password123").await.unwrap();

		assert!(matches!(svc.update(&alice.user_id, None, None).await, Err(AccountError::EmptyUpdate)));
		assert!(matches!(
			svc.update(&alice.user_id, Some("bob"), None).await,
			Err(AccountError::Conflict(_))
		));

		let updated = svc.update(&alice.user_id, Some("alicia"), Some("newpassword1")).await.unwrap();
		assert_eq!(updated.username.as_str(), "alicia");

		assert!(svc.login("alice@example.com", "password123").await.is_err());
		assert!(svc.login("alice@example.com", "newpassword1").await.is_ok());
		assert_eq!(svc.me(&alice.user_id).await.unwrap().username.as_str(), "alicia");
	}
}
