#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::server::accounts::AccountService;
use crate::server::auth::TokenService;
use crate::server::connection::ConnectionSettings;
use crate::server::gateway::RealtimeGateway;
use crate::server::handshake::ConnectionAuthenticator;
use crate::server::hub::{ConnectionHub, ConnectionHubConfig};
use crate::server::messages::MessageService;
use crate::server::password::PasswordHasher;
use crate::server::presence::PresenceRegistry;
use crate::server::rate_limit::RateLimitPolicy;
use crate::server::store::ChatStore;
use crate::server::throttle::ThrottleSettings;

/// HTTP-level knobs the request handlers need.
#[derive(Debug, Clone)]
pub struct HttpSettings {
	pub frontend_url: String,
	pub cookie_name: String,
	pub cookie_secure: bool,
	pub token_ttl: Duration,
	pub max_body_bytes: usize,
	pub throttle: ThrottleSettings,
}

/// Everything a request or realtime connection can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
	pub accounts: AccountService,
	pub messages: MessageService,
	pub gateway: Arc<RealtimeGateway>,
	pub authenticator: ConnectionAuthenticator,
	pub http: HttpSettings,
	pub connection: ConnectionSettings,
}

impl AppState {
	pub fn new(cfg: &ServerConfig, store: Arc<dyn ChatStore>) -> Self {
		let tokens = Arc::new(TokenService::new(cfg.auth.token_secret.clone(), cfg.auth.token_ttl));
		let hasher = PasswordHasher::new(cfg.auth.bcrypt_cost, cfg.auth.min_password_len);

		let presence = Arc::new(PresenceRegistry::new());
		let hub = ConnectionHub::new(ConnectionHubConfig {
			queue_capacity: cfg.realtime.outbound_queue_capacity,
		});
		let gateway = Arc::new(RealtimeGateway::new(
			presence,
			hub,
			RateLimitPolicy {
				capacity: cfg.realtime.rate_limit_capacity,
				window: cfg.realtime.rate_limit_window,
			},
		));

		Self {
			accounts: AccountService::new(Arc::clone(&store), hasher, Arc::clone(&tokens)),
			messages: MessageService::new(store, Arc::clone(&gateway)),
			gateway,
			authenticator: ConnectionAuthenticator::new(tokens, cfg.auth.cookie_name.clone()),
			http: HttpSettings {
				frontend_url: cfg.server.frontend_url.clone(),
				cookie_name: cfg.auth.cookie_name.clone(),
				cookie_secure: cfg.auth.cookie_secure,
				token_ttl: cfg.auth.token_ttl,
				max_body_bytes: 1024 * 1024,
				throttle: ThrottleSettings {
					burst: cfg.server.throttle_burst,
					refill: cfg.server.throttle_refill,
				},
			},
			connection: ConnectionSettings {
				max_frame_bytes: cfg.realtime.max_frame_bytes,
				ping_interval: cfg.realtime.ping_interval,
				ping_timeout: cfg.realtime.ping_timeout,
			},
		}
	}
}
