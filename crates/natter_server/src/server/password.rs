#![forbid(unsafe_code)]

use thiserror::Error;

const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
	#[error("password must be at least {min_len} characters")]
	WeakInput { min_len: usize },
	#[error("password hashing failed: {0}")]
	Hash(String),
}

/// bcrypt-backed credential hasher.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
	cost: u32,
	min_len: usize,
}

impl PasswordHasher {
	pub fn new(cost: u32, min_len: usize) -> Self {
		Self {
			cost: cost.clamp(MIN_COST, MAX_COST),
			min_len,
		}
	}

	/// Reject inputs shorter than the configured minimum (in characters).
	pub fn check_strength(&self, plaintext: &str) -> Result<(), PasswordError> {
		if plaintext.chars().count() < self.min_len {
			return Err(PasswordError::WeakInput { min_len: self.min_len });
		}
		Ok(())
	}

	pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
		self.check_strength(plaintext)?;
		bcrypt::hash(plaintext, self.cost).map_err(|e| PasswordError::Hash(e.to_string()))
	}

	/// `false` on mismatch and on malformed hashes.
	pub fn verify(&self, plaintext: &str, hashed: &str) -> bool {
		bcrypt::verify(plaintext, hashed).unwrap_or(false)
	}

	/// `hash` on the blocking pool.
	pub async fn hash_async(&self, plaintext: String) -> Result<String, PasswordError> {
		let hasher = *self;
		tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
			.await
			.map_err(|e| PasswordError::Hash(e.to_string()))?
	}

	/// `verify` on the blocking pool.
	pub async fn verify_async(&self, plaintext: String, hashed: String) -> bool {
		let hasher = *self;
		tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &hashed))
			.await
			.unwrap_or(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hasher() -> PasswordHasher {
		PasswordHasher::new(4, 8)
	}

	#[test]
	fn short_password_is_weak() {
		assert_eq!(hasher().hash("1234567"), Err(PasswordError::WeakInput { min_len: 8 }));
	}

	#[test]
	fn hash_and_verify() {
		let h = hasher();
		let hashed = h.hash("correct horse").unwrap();
		assert!(hashed.len() >= 60);
		assert_ne!(hashed, "correct horse");
		assert!(h.verify("correct horse", &hashed));
		assert!(!h.verify("wrong horse!", &hashed));
	}

	#[test]
	fn verify_never_errors_on_garbage_hash() {
		assert!(!hasher().verify("whatever123", "not-a-bcrypt-hash"));
	}

	#[test]
	fn hashes_are_salted() {
		let h = hasher();
		assert_ne!(h.hash("password123").unwrap(), h.hash("password123").unwrap());
	}

	#[tokio::test]
	async fn async_wrappers_match_sync() {
		let h = hasher();
		let hashed = h.hash_async("password123".to_string()).await.unwrap();
		assert!(h.verify_async("password123".to_string(), hashed.clone()).await);
		assert!(!h.verify_async("password124".to_string(), hashed).await);
	}
}
