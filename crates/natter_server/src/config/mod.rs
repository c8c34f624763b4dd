#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use natter_domain::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Default bind endpoint for the HTTP + WebSocket listener.
pub const DEFAULT_BIND: &str = "http://127.0.0.1:3000";

/// Default config path: `~/.natter/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".natter").join("config.toml"))
}

/// Load the server config from TOML plus process env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);
	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

/// Parse TOML text into a config (no env overrides).
pub fn parse_server_config(toml_text: &str) -> anyhow::Result<ServerConfig> {
	let file_cfg: FileConfig = toml::from_str(toml_text).context("parse TOML")?;
	Ok(ServerConfig::from_file(file_cfg))
}

/// Startup-fatal configuration problems.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error("token signing secret is not configured (set auth.token_secret or NATTER_TOKEN_SECRET)")]
	MissingTokenSecret,
	#[error("rate limit capacity and window must be non-zero")]
	InvalidRateLimit,
	#[error("outbound queue capacity must be non-zero")]
	InvalidQueueCapacity,
	#[error("throttle refill interval must be non-zero while throttling is enabled")]
	InvalidThrottle,
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub auth: AuthSettings,
	pub realtime: RealtimeSettings,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Listener endpoint (`http://host:port`).
	pub bind: String,
	/// Browser origin allowed by CORS (credentials included).
	pub frontend_url: String,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Per-IP burst on the signup and login endpoints; zero disables throttling.
	pub throttle_burst: u32,
	/// One more request is allowed per IP after each interval.
	pub throttle_refill: Duration,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			bind: DEFAULT_BIND.to_string(),
			frontend_url: "http://localhost:5173".to_string(),
			metrics_bind: None,
			health_bind: None,
			throttle_burst: 3,
			throttle_refill: Duration::from_millis(3334),
		}
	}
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
	/// HMAC secret used to sign session tokens.
	pub token_secret: Option<SecretString>,
	pub token_ttl: Duration,
	pub cookie_name: String,
	/// Add `Secure` to the session cookie.
	pub cookie_secure: bool,
	/// bcrypt log-rounds.
	pub bcrypt_cost: u32,
	pub min_password_len: usize,
}

impl Default for AuthSettings {
	fn default() -> Self {
		Self {
			token_secret: None,
			token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
			cookie_name: "auth_token".to_string(),
			cookie_secure: false,
			bcrypt_cost: 10,
			min_password_len: 8,
		}
	}
}

#[derive(Debug, Clone)]
pub struct RealtimeSettings {
	/// Fixed window limiter: events allowed per window.
	pub rate_limit_capacity: u32,
	pub rate_limit_window: Duration,
	/// Per-connection outbound queue size.
	pub outbound_queue_capacity: usize,
	pub ping_interval: Duration,
	/// Close a connection after this long without inbound traffic.
	pub ping_timeout: Duration,
	pub max_frame_bytes: usize,
}

impl Default for RealtimeSettings {
	fn default() -> Self {
		Self {
			rate_limit_capacity: 10,
			rate_limit_window: Duration::from_secs(60),
			outbound_queue_capacity: 256,
			ping_interval: Duration::from_secs(25),
			ping_timeout: Duration::from_secs(60),
			max_frame_bytes: natter_protocol::DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// `sqlite:` or `postgres:` URL; in-memory store when unset.
	pub database_url: Option<String>,
}

impl ServerConfig {
	/// Checks the invariants the server cannot start without.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.auth.token_secret.as_ref().is_none_or(SecretString::is_empty) {
			return Err(ConfigError::MissingTokenSecret);
		}
		if self.realtime.rate_limit_capacity == 0 || self.realtime.rate_limit_window.is_zero() {
			return Err(ConfigError::InvalidRateLimit);
		}
		if self.realtime.outbound_queue_capacity == 0 {
			return Err(ConfigError::InvalidQueueCapacity);
		}
		if self.server.throttle_burst > 0 && self.server.throttle_refill.is_zero() {
			return Err(ConfigError::InvalidThrottle);
		}
		Ok(())
	}

	fn from_file(file: FileConfig) -> Self {
		let server_defaults = ServerSettings::default();
		let auth_defaults = AuthSettings::default();
		let realtime_defaults = RealtimeSettings::default();

		Self {
			server: ServerSettings {
				bind: file.server.bind.filter(|s| !s.trim().is_empty()).unwrap_or(server_defaults.bind),
				frontend_url: file
					.server
					.frontend_url
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(server_defaults.frontend_url),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				throttle_burst: file.server.throttle_burst.unwrap_or(server_defaults.throttle_burst),
				throttle_refill: file
					.server
					.throttle_refill_ms
					.map(Duration::from_millis)
					.unwrap_or(server_defaults.throttle_refill),
			},
			auth: AuthSettings {
				token_secret: file
					.auth
					.token_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				token_ttl: file
					.auth
					.token_ttl_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(auth_defaults.token_ttl),
				cookie_name: file
					.auth
					.cookie_name
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(auth_defaults.cookie_name),
				cookie_secure: file.auth.cookie_secure.unwrap_or(false),
				bcrypt_cost: clamp_bcrypt_cost(file.auth.bcrypt_cost.unwrap_or(auth_defaults.bcrypt_cost)),
				min_password_len: file.auth.min_password_len.unwrap_or(auth_defaults.min_password_len),
			},
			realtime: RealtimeSettings {
				rate_limit_capacity: file
					.realtime
					.rate_limit_capacity
					.unwrap_or(realtime_defaults.rate_limit_capacity),
				rate_limit_window: file
					.realtime
					.rate_limit_window_secs
					.map(Duration::from_secs)
					.unwrap_or(realtime_defaults.rate_limit_window),
				outbound_queue_capacity: file
					.realtime
					.outbound_queue_capacity
					.unwrap_or(realtime_defaults.outbound_queue_capacity),
				ping_interval: file
					.realtime
					.ping_interval_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(realtime_defaults.ping_interval),
				ping_timeout: file
					.realtime
					.ping_timeout_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(realtime_defaults.ping_timeout),
				max_frame_bytes: file
					.realtime
					.max_frame_bytes
					.filter(|v| *v > 0)
					.unwrap_or(realtime_defaults.max_frame_bytes),
			},
			persistence: PersistenceSettings {
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	auth: FileAuthSettings,

	#[serde(default)]
	realtime: FileRealtimeSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	bind: Option<String>,
	frontend_url: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	throttle_burst: Option<u32>,
	throttle_refill_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileAuthSettings {
	token_secret: Option<String>,
	token_ttl_secs: Option<u64>,
	cookie_name: Option<String>,
	cookie_secure: Option<bool>,
	bcrypt_cost: Option<u32>,
	min_password_len: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileRealtimeSettings {
	rate_limit_capacity: Option<u32>,
	rate_limit_window_secs: Option<u64>,
	outbound_queue_capacity: Option<usize>,
	ping_interval_secs: Option<u64>,
	ping_timeout_secs: Option<u64>,
	max_frame_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
}

fn clamp_bcrypt_cost(cost: u32) -> u32 {
	cost.clamp(4, 31)
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

/// First non-empty value among `keys`.
fn first_non_empty(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
	keys.iter()
		.filter_map(|k| lookup(k))
		.map(|v| v.trim().to_string())
		.find(|v| !v.is_empty())
}

/// Apply `NATTER_*` overrides (plus the legacy names the web client's deployment uses).
pub fn apply_env_overrides(cfg: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
	if let Some(v) = first_non_empty(&lookup, &["NATTER_BIND"]) {
		cfg.server.bind = v;
		info!("server config: bind overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_FRONTEND_URL", "FRONTEND_URL"]) {
		cfg.server.frontend_url = v;
		info!("server config: frontend_url overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_METRICS_BIND"]) {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_HEALTH_BIND"]) {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_THROTTLE_BURST"])
		&& let Ok(burst) = v.parse::<u32>()
	{
		cfg.server.throttle_burst = burst;
		info!(burst, "server config: throttle_burst overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_THROTTLE_REFILL_MS"])
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.server.throttle_refill = Duration::from_millis(ms);
		info!(ms, "server config: throttle_refill overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_TOKEN_SECRET", "JWT_SECRET"]) {
		cfg.auth.token_secret = Some(SecretString::new(v));
		info!("server auth: token_secret overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_TOKEN_TTL_SECS"]) {
		match v.parse::<u64>() {
			Ok(secs) if secs > 0 => {
				cfg.auth.token_ttl = Duration::from_secs(secs);
				info!(secs, "server auth: token_ttl overridden by env");
			}
			_ => warn!(value = %v, "server auth: ignoring invalid NATTER_TOKEN_TTL_SECS"),
		}
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_COOKIE_NAME"]) {
		cfg.auth.cookie_name = v;
		info!("server auth: cookie_name overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_COOKIE_SECURE"])
		&& let Some(secure) = parse_env_bool(&v)
	{
		cfg.auth.cookie_secure = secure;
		info!(secure, "server auth: cookie_secure overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_BCRYPT_COST", "BCRYPT_SALT_ROUNDS"])
		&& let Ok(cost) = v.parse::<u32>()
	{
		let clamped = clamp_bcrypt_cost(cost);
		if clamped != cost {
			warn!(cost, clamped, "server auth: bcrypt cost out of range; clamping");
		}
		cfg.auth.bcrypt_cost = clamped;
		info!(cost = clamped, "server auth: bcrypt_cost overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_MIN_PASSWORD_LEN"])
		&& let Ok(len) = v.parse::<usize>()
	{
		cfg.auth.min_password_len = len;
		info!(len, "server auth: min_password_len overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_RATE_LIMIT_CAPACITY"])
		&& let Ok(capacity) = v.parse::<u32>()
	{
		cfg.realtime.rate_limit_capacity = capacity;
		info!(capacity, "realtime config: rate_limit_capacity overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_RATE_LIMIT_WINDOW_SECS"])
		&& let Ok(secs) = v.parse::<u64>()
	{
		cfg.realtime.rate_limit_window = Duration::from_secs(secs);
		info!(secs, "realtime config: rate_limit_window overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_OUTBOUND_QUEUE_CAPACITY"])
		&& let Ok(capacity) = v.parse::<usize>()
	{
		cfg.realtime.outbound_queue_capacity = capacity;
		info!(capacity, "realtime config: outbound_queue_capacity overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_PING_INTERVAL_SECS"])
		&& let Ok(secs) = v.parse::<u64>()
		&& secs > 0
	{
		cfg.realtime.ping_interval = Duration::from_secs(secs);
		info!(secs, "realtime config: ping_interval overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_PING_TIMEOUT_SECS"])
		&& let Ok(secs) = v.parse::<u64>()
		&& secs > 0
	{
		cfg.realtime.ping_timeout = Duration::from_secs(secs);
		info!(secs, "realtime config: ping_timeout overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_MAX_FRAME_BYTES"])
		&& let Ok(bytes) = v.parse::<usize>()
		&& bytes > 0
	{
		cfg.realtime.max_frame_bytes = bytes;
		info!(bytes, "realtime config: max_frame_bytes overridden by env");
	}

	if let Some(v) = first_non_empty(&lookup, &["NATTER_DATABASE_URL"]) {
		cfg.persistence.database_url = Some(v);
		info!("persistence: database_url overridden by env");
	}

	if cfg.realtime.ping_timeout <= cfg.realtime.ping_interval {
		warn!(
			interval_secs = cfg.realtime.ping_interval.as_secs(),
			timeout_secs = cfg.realtime.ping_timeout.as_secs(),
			"realtime config: ping_timeout should exceed ping_interval"
		);
	}
}
