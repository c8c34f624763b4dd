#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers and account fields from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid email: {0}")]
	InvalidEmail(String),
	#[error("username must be {min}-{max} characters")]
	InvalidUsername {
		min: usize,
		max: usize,
	},
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Stable identifier of a registered user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		let trimmed = id.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(trimmed.to_string()))
	}

	/// Fresh random id for a newly registered account.
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().simple().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

impl TryFrom<String> for UserId {
	type Error = ParseIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		UserId::new(value)
	}
}

impl From<UserId> for String {
	fn from(value: UserId) -> Self {
		value.0
	}
}

/// Normalized (trimmed, lowercased) email address of the form `local@domain.tld`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		let normalized = s.to_ascii_lowercase();
		if normalized.chars().any(char::is_whitespace) {
			return Err(ParseIdError::InvalidEmail(normalized));
		}

		let Some((local, domain)) = normalized.split_once('@') else {
			return Err(ParseIdError::InvalidEmail(normalized));
		};

		if local.is_empty() || domain.contains('@') {
			return Err(ParseIdError::InvalidEmail(normalized));
		}

		// At least one dot with something on both sides of it.
		let has_inner_dot = domain
			.char_indices()
			.any(|(idx, c)| c == '.' && idx > 0 && idx + 1 < domain.len());
		if !has_inner_dot {
			return Err(ParseIdError::InvalidEmail(normalized));
		}

		Ok(Self(normalized))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Email {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Email {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Email::parse(s)
	}
}

impl TryFrom<String> for Email {
	type Error = ParseIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Email::parse(&value)
	}
}

impl From<Email> for String {
	fn from(value: Email) -> Self {
		value.0
	}
}

/// Display name chosen at signup; 3 to 30 characters after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
	pub const MIN_LEN: usize = 3;
	pub const MAX_LEN: usize = 30;

	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		let len = s.chars().count();
		if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&len) {
			return Err(ParseIdError::InvalidUsername {
				min: Self::MIN_LEN,
				max: Self::MAX_LEN,
			});
		}

		Ok(Self(s.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Username {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl TryFrom<String> for Username {
	type Error = ParseIdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Username::parse(&value)
	}
}

impl From<Username> for String {
	fn from(value: Username) -> Self {
		value.0
	}
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
	/// Create a new random message id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for MessageId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		uuid::Uuid::parse_str(s)
			.map(Self)
			.map_err(|e| ParseIdError::InvalidFormat(e.to_string()))
	}
}

/// Transport-assigned identifier of one live realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
	pub const fn new(raw: u64) -> Self {
		Self(raw)
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for ConnectionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "conn-{}", self.0)
	}
}

/// A registered user as seen by the realtime layer: stable id plus login email.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
	pub id: UserId,
	pub email: Email,
}

impl Identity {
	pub fn new(id: UserId, email: Email) -> Self {
		Self { id, email }
	}
}

/// String wrapper that keeps secrets out of logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}
