#![forbid(unsafe_code)]

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use natter_domain::{Email, Identity, SecretString, UserId};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use crate::util::time::unix_secs_now;

const TOKEN_VERSION: &str = "v1";

/// Token failures. Every verification failure collapses into `InvalidToken`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
	#[error("token signing secret is not configured")]
	Configuration,
	#[error("invalid token")]
	InvalidToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
	sub: String,
	email: String,
	iat: u64,
	exp: u64,
}

/// Decoded, trusted token contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
	pub identity: Identity,
	/// Unix seconds.
	pub issued_at: u64,
	/// Unix seconds.
	pub expires_at: u64,
}

/// Signs and verifies `v1.<payload>.<signature>` session tokens (HMAC-SHA256).
#[derive(Debug, Clone)]
pub struct TokenService {
	secret: Option<SecretString>,
	default_ttl: Duration,
}

impl TokenService {
	pub fn new(secret: Option<SecretString>, default_ttl: Duration) -> Self {
		let secret = secret.filter(|s| !s.is_empty());
		Self { secret, default_ttl }
	}

	pub fn default_ttl(&self) -> Duration {
		self.default_ttl
	}

	/// Issue a token for `identity` valid for `ttl` from now.
	pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, TokenError> {
		self.issue_at(identity, unix_secs_now(), ttl)
	}

	fn issue_at(&self, identity: &Identity, now: u64, ttl: Duration) -> Result<String, TokenError> {
		let secret = self.secret.as_ref().ok_or(TokenError::Configuration)?;

		let claims = Claims {
			sub: identity.id.as_str().to_string(),
			email: identity.email.as_str().to_string(),
			iat: now,
			exp: now.saturating_add(ttl.as_secs()),
		};
		let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Configuration)?;
		let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
		let sig = sign(payload_b64.as_bytes(), secret.expose().as_bytes()).ok_or(TokenError::Configuration)?;

		Ok(format!("{TOKEN_VERSION}.{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig)))
	}

	/// Verify a token and decode its identity.
	pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
		self.verify_at(token, unix_secs_now())
	}

	fn verify_at(&self, token: &str, now: u64) -> Result<VerifiedToken, TokenError> {
		self.try_verify(token, now).ok_or_else(|| {
			debug!("token verification failed");
			TokenError::InvalidToken
		})
	}

	fn try_verify(&self, token: &str, now: u64) -> Option<VerifiedToken> {
		let secret = self.secret.as_ref()?;

		let mut parts = token.trim().split('.');
		let (version, payload_b64, sig_b64) = (parts.next()?, parts.next()?, parts.next()?);
		if parts.next().is_some() || version != TOKEN_VERSION {
			return None;
		}

		let expected_sig = sign(payload_b64.as_bytes(), secret.expose().as_bytes())?;
		let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).ok()?;
		if !constant_time_eq(&expected_sig, &provided_sig) {
			return None;
		}

		let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
		let claims: Claims = serde_json::from_slice(&payload).ok()?;
		if claims.exp <= now {
			return None;
		}

		let id = UserId::new(claims.sub).ok()?;
		let email = Email::parse(&claims.email).ok()?;

		Some(VerifiedToken {
			identity: Identity::new(id, email),
			issued_at: claims.iat,
			expires_at: claims.exp,
		})
	}
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Option<Vec<u8>> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).ok()?;
	mac.update(payload_b64);
	Some(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}

#[cfg(test)]
mod tests {
	use super::*;

	fn identity() -> Identity {
		Identity::new(UserId::new("u1").unwrap(), Email::parse("u1@example.com").unwrap())
	}

	fn service(secret: &str) -> TokenService {
		TokenService::new(Some(SecretString::new(secret)), Duration::from_secs(3600))
	}

	#[test]
	fn issue_then_verify() {
		let svc = service("secret");
		let token = svc.issue_at(&identity(), 1_000, Duration::from_secs(60)).unwrap();

		let verified = svc.verify_at(&token, 1_030).unwrap();
		assert_eq!(verified.identity, identity());
		assert_eq!(verified.issued_at, 1_000);
		assert_eq!(verified.expires_at, 1_060);
	}

	#[test]
	fn missing_secret_is_configuration_error() {
		let svc = TokenService::new(None, Duration::from_secs(60));
		assert_eq!(svc.issue(&identity(), Duration::from_secs(60)), Err(TokenError::Configuration));

		let blank = TokenService::new(Some(SecretString::new("  ")), Duration::from_secs(60));
		assert_eq!(blank.issue(&identity(), Duration::from_secs(60)), Err(TokenError::Configuration));
		assert_eq!(blank.verify("v1.a.b"), Err(TokenError::InvalidToken));
	}

	#[test]
	fn every_failure_is_the_same_error() {
		let svc = service("secret");
		let token = svc.issue_at(&identity(), 1_000, Duration::from_secs(60)).unwrap();

		let expired = svc.verify_at(&token, 1_060);
		let wrong_key = service("other").verify_at(&token, 1_001);
		let malformed = svc.verify_at("not-a-token", 1_001);
		let wrong_version = svc.verify_at(&token.replacen("v1", "v2", 1), 1_001);
		let extra_part = svc.verify_at(&format!("{token}.x"), 1_001);

		let mut tampered = token.clone();
		tampered.insert(5, 'A');
		let tampered = svc.verify_at(&tampered, 1_001);

		for res in [expired, wrong_key, malformed, wrong_version, extra_part, tampered] {
			assert_eq!(res, Err(TokenError::InvalidToken));
		}
	}

	#[test]
	fn missing_claim_is_rejected() {
		let svc = service("secret");
		let payload_b64 = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1","iat":1,"exp":99999999999}"#);
		let sig = sign(payload_b64.as_bytes(), b"secret").unwrap();
		let token = format!("v1.{payload_b64}.{}", URL_SAFE_NO_PAD.encode(sig));

		assert_eq!(svc.verify(&token), Err(TokenError::InvalidToken));
	}
}
