#![forbid(unsafe_code)]

use std::sync::Arc;

use cookie::Cookie;
use natter_domain::Identity;
use thiserror::Error;
use tracing::debug;

use crate::server::auth::TokenService;

/// The only way a handshake can fail. Missing and invalid credentials look the same.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
	#[error("Unauthorized")]
	Unauthorized,
}

/// Credential-bearing parts of a connect request.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakeRequest<'a> {
	/// Raw `Cookie` header value.
	pub cookie_header: Option<&'a str>,
	/// Raw query string of the upgrade URL (without `?`).
	pub query: Option<&'a str>,
}

/// Trusted identity attached to a connection; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedContext {
	pub identity: Identity,
}

/// Gate between an anonymous connection and an application session.
#[derive(Debug, Clone)]
pub struct ConnectionAuthenticator {
	tokens: Arc<TokenService>,
	cookie_name: String,
}

impl ConnectionAuthenticator {
	pub fn new(tokens: Arc<TokenService>, cookie_name: impl Into<String>) -> Self {
		Self {
			tokens,
			cookie_name: cookie_name.into(),
		}
	}

	pub fn cookie_name(&self) -> &str {
		&self.cookie_name
	}

	pub fn tokens(&self) -> &TokenService {
		&self.tokens
	}

	pub fn authenticate(&self, req: HandshakeRequest<'_>) -> Result<AuthenticatedContext, HandshakeError> {
		let Some(token) = extract_token(req, &self.cookie_name) else {
			debug!("handshake rejected: no credential");
			metrics::counter!("natter_server_auth_failures_total").increment(1);
			return Err(HandshakeError::Unauthorized);
		};

		match self.tokens.verify(&token) {
			Ok(verified) => Ok(AuthenticatedContext {
				identity: verified.identity,
			}),
			Err(_) => {
				debug!("handshake rejected: credential did not verify");
				metrics::counter!("natter_server_auth_failures_total").increment(1);
				Err(HandshakeError::Unauthorized)
			}
		}
	}
}

/// Prefer the named cookie; fall back to the `token` query parameter.
pub fn extract_token(req: HandshakeRequest<'_>, cookie_name: &str) -> Option<String> {
	req.cookie_header
		.and_then(|h| token_from_cookie_header(h, cookie_name))
		.or_else(|| req.query.and_then(token_from_query))
}

pub fn token_from_cookie_header(header: &str, cookie_name: &str) -> Option<String> {
	Cookie::split_parse_encoded(header)
		.filter_map(Result::ok)
		.find(|c| c.name() == cookie_name)
		.map(|c| c.value().trim().to_string())
		.filter(|v| !v.is_empty())
}

fn token_from_query(query: &str) -> Option<String> {
	query
		.split('&')
		.filter_map(|pair| pair.split_once('='))
		.find(|(k, _)| *k == "token")
		.and_then(|(_, v)| urlencoding::decode(v).ok())
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use natter_domain::{Email, SecretString, UserId};

	use super::*;

	fn authenticator() -> ConnectionAuthenticator {
		let tokens = TokenService::new(Some(SecretString::new("secret")), Duration::from_secs(60));
		ConnectionAuthenticator::new(Arc::new(tokens), "auth_token")
	}

	fn identity() -> Identity {
		Identity::new(UserId::new("u1").unwrap(), Email::parse("u1@example.com").unwrap())
	}

	#[test]
	fn cookie_is_preferred_over_query() {
		let req = HandshakeRequest {
			cookie_header: Some("theme=dark; auth_token=from-cookie"),
			query: Some("token=from-query"),
		};
		assert_eq!(extract_token(req, "auth_token").as_deref(), Some("from-cookie"));
	}

	#[test]
	fn query_is_fallback_and_percent_decoded() {
		let req = HandshakeRequest {
			cookie_header: Some("theme=dark"),
			query: Some("foo=1&token=a%2Eb%2Ec"),
		};
		assert_eq!(extract_token(req, "auth_token").as_deref(), Some("a.b.c"));
	}

	#[test]
	fn empty_values_count_as_missing() {
		let req = HandshakeRequest {
			cookie_header: Some("auth_token="),
			query: Some("token="),
		};
		assert_eq!(extract_token(req, "auth_token"), None);
	}

	#[test]
	fn valid_cookie_attaches_identity() {
		let auth = authenticator();
		let token = auth.tokens().issue(&identity(), Duration::from_secs(60)).unwrap();
		let header = format!("auth_token={token}");

		let ctx = auth
			.authenticate(HandshakeRequest {
				cookie_header: Some(&header),
				query: None,
			})
			.unwrap();
		assert_eq!(ctx.identity, identity());
	}

	#[test]
	fn missing_and_invalid_are_indistinguishable() {
		let auth = authenticator();
		let missing = auth.authenticate(HandshakeRequest::default());
		let invalid = auth.authenticate(HandshakeRequest {
			cookie_header: Some("auth_token=v1.bogus.sig"),
			query: None,
		});

		assert_eq!(missing, Err(HandshakeError::Unauthorized));
		assert_eq!(missing, invalid);
		assert_eq!(
			missing.unwrap_err().to_string(),
			invalid.unwrap_err().to_string()
		);
	}
}
