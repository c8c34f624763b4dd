#![forbid(unsafe_code)]

//! REST handlers under `/api/v1`.

use axum::extract::{FromRequest, FromRequestParts, Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::{self, HeaderValue};
use axum::http::request::Parts;
use axum::response::Response;
use bytes::Bytes;
use cookie::time::Duration as CookieDuration;
use cookie::{Cookie, SameSite};
use natter_domain::{Identity, UserId};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::error;

use crate::server::accounts::AccountError;
use crate::server::handshake::HandshakeRequest;
use crate::server::http::{json_error, json_message, json_ok, unauthorized};
use crate::server::messages::MessageError;
use crate::server::state::AppState;
use crate::util::time::rfc3339_now;

/// The caller's identity from the session cookie. Rejects with the 401 envelope.
pub struct CurrentUser(pub Identity);

impl FromRequestParts<AppState> for CurrentUser {
	type Rejection = Response;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		let cookie_header = parts.headers.get(header::COOKIE).and_then(|v| v.to_str().ok());
		state
			.authenticator
			.authenticate(HandshakeRequest {
				cookie_header,
				query: None,
			})
			.map(|ctx| CurrentUser(ctx.identity))
			.map_err(|_| unauthorized())
	}
}

/// JSON body where an empty body reads as `T::default()`, so missing fields reach the
/// handler's own validation.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
	S: Send + Sync,
	T: DeserializeOwned + Default + Send,
{
	type Rejection = Response;

	async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
		let body = Bytes::from_request(req, state).await.map_err(|e| {
			if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
				json_error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
			} else {
				json_error(StatusCode::BAD_REQUEST, "Invalid request body")
			}
		})?;

		if body.iter().all(u8::is_ascii_whitespace) {
			return Ok(Self(T::default()));
		}
		serde_json::from_slice(&body)
			.map(Self)
			.map_err(|_| json_error(StatusCode::BAD_REQUEST, "Invalid JSON body"))
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterBody {
	email: Option<String>,
	username: Option<String>,
	password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginBody {
	email: Option<String>,
	password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateUserBody {
	username: Option<String>,
	password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SendMessageBody {
	text: Option<String>,
	image: Option<String>,
}

fn parse_path_id(raw: String) -> Result<UserId, Response> {
	UserId::new(raw).map_err(|_| json_error(StatusCode::BAD_REQUEST, "Invalid user id"))
}

fn with_cookie(mut resp: Response, cookie: Cookie<'_>) -> Response {
	match HeaderValue::from_str(&cookie.to_string()) {
		Ok(v) => {
			resp.headers_mut().append(header::SET_COOKIE, v);
			resp
		}
		Err(e) => {
			error!(error = %e, "session cookie is not a valid header value");
			json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
		}
	}
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
	Cookie::build((state.http.cookie_name.clone(), token))
		.http_only(true)
		.same_site(SameSite::Strict)
		.path("/")
		.max_age(CookieDuration::seconds(state.http.token_ttl.as_secs() as i64))
		.secure(state.http.cookie_secure)
		.build()
}

fn clearing_cookie(state: &AppState) -> Cookie<'static> {
	Cookie::build((state.http.cookie_name.clone(), String::new()))
		.http_only(true)
		.same_site(SameSite::Strict)
		.path("/")
		.max_age(CookieDuration::ZERO)
		.secure(state.http.cookie_secure)
		.build()
}

fn account_error(e: AccountError) -> Response {
	match e {
		AccountError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, &msg),
		AccountError::Conflict(msg) => json_error(StatusCode::CONFLICT, msg),
		AccountError::InvalidCredentials => json_error(StatusCode::UNAUTHORIZED, "Invalid credentials"),
		AccountError::NotFound => json_error(StatusCode::NOT_FOUND, "User not found"),
		AccountError::EmptyUpdate => json_error(StatusCode::BAD_REQUEST, "Provide a username or password to update"),
		AccountError::Token(e) => {
			error!(error = %e, "accounts: token issue failed");
			json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
		}
		AccountError::Internal(e) => {
			error!(error = ?e, "accounts: internal error");
			json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
		}
	}
}

fn message_error(e: MessageError) -> Response {
	match e {
		MessageError::EmptyMessage | MessageError::TextTooLong { .. } => {
			json_error(StatusCode::BAD_REQUEST, &e.to_string())
		}
		MessageError::ReceiverNotFound => json_error(StatusCode::NOT_FOUND, "Receiver not found"),
		MessageError::Store(e) => {
			error!(error = ?e, "messages: store error");
			json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
		}
	}
}

pub async fn not_found() -> Response {
	json_error(StatusCode::NOT_FOUND, "Route not found")
}

pub async fn health(State(state): State<AppState>) -> Response {
	json_ok(
		StatusCode::OK,
		"Server is healthy",
		json!({
			"status": "ok",
			"timestamp": rfc3339_now(),
			"onlineUsers": state.gateway.online_users().len(),
		}),
	)
}

pub async fn register(State(state): State<AppState>, JsonBody(req): JsonBody<RegisterBody>) -> Response {
	match state
		.accounts
		.register(
			req.email.as_deref().unwrap_or_default(),
			req.username.as_deref().unwrap_or_default(),
			req.password.as_deref().unwrap_or_default(),
		)
		.await
	{
		Ok(profile) => json_ok(StatusCode::CREATED, "User signed up successfully", profile),
		Err(e) => account_error(e),
	}
}

pub async fn login(State(state): State<AppState>, JsonBody(req): JsonBody<LoginBody>) -> Response {
	let (Some(email), Some(password)) = (req.email, req.password) else {
		return json_error(StatusCode::BAD_REQUEST, "Email and password are required");
	};

	match state.accounts.login(&email, &password).await {
		Ok((profile, token)) => with_cookie(
			json_ok(StatusCode::OK, "Logged in successfully", profile),
			session_cookie(&state, token),
		),
		Err(e) => account_error(e),
	}
}

pub async fn logout(State(state): State<AppState>) -> Response {
	with_cookie(
		json_message(StatusCode::OK, "Logged out successfully"),
		clearing_cookie(&state),
	)
}

pub async fn update_user(
	State(state): State<AppState>,
	CurrentUser(me): CurrentUser,
	JsonBody(req): JsonBody<UpdateUserBody>,
) -> Response {
	match state
		.accounts
		.update(&me.id, req.username.as_deref(), req.password.as_deref())
		.await
	{
		Ok(profile) => json_ok(StatusCode::OK, "Profile updated", profile),
		Err(e) => account_error(e),
	}
}

pub async fn me(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> Response {
	match state.accounts.me(&me.id).await {
		Ok(profile) => json_ok(StatusCode::OK, "Authenticated user", profile),
		Err(e) => account_error(e),
	}
}

pub async fn all_contacts(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> Response {
	match state.messages.all_contacts(&me.id).await {
		Ok(contacts) => json_ok(StatusCode::OK, "Contacts fetched", contacts),
		Err(e) => message_error(e),
	}
}

pub async fn chat_contacts(State(state): State<AppState>, CurrentUser(me): CurrentUser) -> Response {
	match state.messages.chat_contacts(&me.id).await {
		Ok(contacts) => json_ok(StatusCode::OK, "Chat contacts fetched", contacts),
		Err(e) => message_error(e),
	}
}

pub async fn online_users(State(state): State<AppState>, CurrentUser(_): CurrentUser) -> Response {
	json_ok(StatusCode::OK, "Online users", state.messages.online_users())
}

pub async fn conversation(
	State(state): State<AppState>,
	CurrentUser(me): CurrentUser,
	Path(other): Path<String>,
) -> Response {
	let other = match parse_path_id(other) {
		Ok(id) => id,
		Err(resp) => return resp,
	};

	match state.messages.conversation(&me.id, &other).await {
		Ok(messages) => json_ok(StatusCode::OK, "Messages fetched", messages),
		Err(e) => message_error(e),
	}
}

pub async fn send_message(
	State(state): State<AppState>,
	CurrentUser(me): CurrentUser,
	Path(receiver): Path<String>,
	JsonBody(req): JsonBody<SendMessageBody>,
) -> Response {
	let receiver = match parse_path_id(receiver) {
		Ok(id) => id,
		Err(resp) => return resp,
	};

	match state
		.messages
		.send(&me.id, receiver, req.text.as_deref(), req.image.as_deref())
		.await
	{
		Ok(message) => json_ok(StatusCode::CREATED, "Message sent", message),
		Err(e) => message_error(e),
	}
}
