#![forbid(unsafe_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use speakwatch_platform::{RestConfig, SecretString};
use tracing::{info, warn};

use crate::server::directory::DirectoryConfig;
use crate::server::notifier::NotifierConfig;
use crate::server::path::DEFAULT_MAX_PATH_DEPTH;
use crate::server::poller::PollerConfig;
use crate::server::publisher::PublisherConfig;

/// Listen address used when nothing else is configured.
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Default config path: `~/.speakwatch/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".speakwatch").join("config.toml"))
}

/// Load the server config from TOML and process env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	/// Upstream bot token; required unless the demo upstream is enabled.
	pub bot_token: Option<SecretString>,
	pub server: ServerSettings,
	pub upstream: UpstreamSettings,
	pub poller: PollerSettings,
	pub directory: DirectorySettings,
	pub notifier: NotifierSettings,
}

/// Listener settings.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// HTTP/websocket bind address (host:port).
	pub bind: Option<String>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

/// Upstream API settings.
#[derive(Debug, Clone, Default)]
pub struct UpstreamSettings {
	pub base_url: Option<String>,
	pub request_timeout: Option<Duration>,
	pub include_suspended_users: bool,
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
	pub interval: Duration,
	pub timeline_limit: u32,
}

impl Default for PollerSettings {
	fn default() -> Self {
		let d = PollerConfig::default();
		Self {
			interval: d.interval,
			timeline_limit: d.timeline_limit,
		}
	}
}

#[derive(Debug, Clone)]
pub struct DirectorySettings {
	/// Longest parent chain a channel path may have.
	pub max_path_depth: usize,
	/// Cache the `webhook` fallback after a failed user lookup.
	pub cache_user_fallback: bool,
}

impl Default for DirectorySettings {
	fn default() -> Self {
		Self {
			max_path_depth: DEFAULT_MAX_PATH_DEPTH,
			cache_user_fallback: DirectoryConfig::default().cache_user_fallback,
		}
	}
}

#[derive(Debug, Clone)]
pub struct NotifierSettings {
	/// Frames queued per subscriber before it is disconnected.
	pub subscriber_queue_capacity: usize,
	/// Largest encoded frame sent to subscribers.
	pub max_frame_size: usize,
	/// Debug logs for subscriber churn and published batches.
	pub debug_logs: bool,
}

impl Default for NotifierSettings {
	fn default() -> Self {
		let d = NotifierConfig::default();
		Self {
			subscriber_queue_capacity: d.subscriber_queue_capacity,
			max_frame_size: d.max_frame_size,
			debug_logs: d.debug_logs,
		}
	}
}

impl ServerConfig {
	/// Resolved listen address.
	pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
		let bind = self.server.bind.as_deref().unwrap_or(DEFAULT_BIND);
		bind.parse()
			.with_context(|| format!("invalid bind address {bind:?} (expected host:port)"))
	}

	/// Upstream REST client settings; `None` without a token.
	pub fn rest_config(&self) -> Option<RestConfig> {
		let token = self.bot_token.clone()?;
		let mut rest = RestConfig::new(token);
		if let Some(base_url) = self.upstream.base_url.clone() {
			rest.base_url = base_url;
		}
		if let Some(timeout) = self.upstream.request_timeout {
			rest.request_timeout = timeout;
		}
		rest.include_suspended_users = self.upstream.include_suspended_users;
		Some(rest)
	}

	pub fn poller_config(&self) -> PollerConfig {
		PollerConfig {
			interval: self.poller.interval,
			timeline_limit: self.poller.timeline_limit,
		}
	}

	pub fn directory_config(&self) -> DirectoryConfig {
		DirectoryConfig {
			cache_user_fallback: self.directory.cache_user_fallback,
		}
	}

	pub fn notifier_config(&self) -> NotifierConfig {
		NotifierConfig {
			subscriber_queue_capacity: self.notifier.subscriber_queue_capacity,
			max_frame_size: self.notifier.max_frame_size,
			debug_logs: self.notifier.debug_logs,
		}
	}

	pub fn publisher_config(&self) -> PublisherConfig {
		PublisherConfig {
			debug_log_batches: self.notifier.debug_logs,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	bot_token: Option<String>,

	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	upstream: FileUpstreamSettings,

	#[serde(default)]
	poller: FilePollerSettings,

	#[serde(default)]
	directory: FileDirectorySettings,

	#[serde(default)]
	notifier: FileNotifierSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	bind: Option<String>,
	metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileUpstreamSettings {
	base_url: Option<String>,
	request_timeout_ms: Option<u64>,
	include_suspended_users: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePollerSettings {
	interval_ms: Option<u64>,
	timeline_limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDirectorySettings {
	max_path_depth: Option<usize>,
	cache_user_fallback: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileNotifierSettings {
	subscriber_queue_capacity: Option<usize>,
	max_frame_size: Option<usize>,
	debug_logs: Option<bool>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let poller_defaults = PollerSettings::default();
		let directory_defaults = DirectorySettings::default();
		let notifier_defaults = NotifierSettings::default();

		Self {
			bot_token: file.bot_token.filter(|s| !s.trim().is_empty()).map(SecretString::new),
			server: ServerSettings {
				bind: file.server.bind.filter(|s| !s.trim().is_empty()),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
			},
			upstream: UpstreamSettings {
				base_url: file.upstream.base_url.filter(|s| !s.trim().is_empty()),
				request_timeout: file
					.upstream
					.request_timeout_ms
					.filter(|v| *v > 0)
					.map(Duration::from_millis),
				include_suspended_users: file.upstream.include_suspended_users.unwrap_or(false),
			},
			poller: PollerSettings {
				interval: file
					.poller
					.interval_ms
					.filter(|v| *v > 0)
					.map(Duration::from_millis)
					.unwrap_or(poller_defaults.interval),
				timeline_limit: file
					.poller
					.timeline_limit
					.filter(|v| *v > 0)
					.unwrap_or(poller_defaults.timeline_limit),
			},
			directory: DirectorySettings {
				max_path_depth: file
					.directory
					.max_path_depth
					.filter(|v| *v > 0)
					.unwrap_or(directory_defaults.max_path_depth),
				cache_user_fallback: file
					.directory
					.cache_user_fallback
					.unwrap_or(directory_defaults.cache_user_fallback),
			},
			notifier: NotifierSettings {
				subscriber_queue_capacity: file
					.notifier
					.subscriber_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(notifier_defaults.subscriber_queue_capacity),
				max_frame_size: file
					.notifier
					.max_frame_size
					.filter(|v| *v > 0)
					.unwrap_or(notifier_defaults.max_frame_size),
				debug_logs: file.notifier.debug_logs.unwrap_or(notifier_defaults.debug_logs),
			},
		}
	}
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
		Ok(s) => Ok(Some(parse_toml(&s)?)),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn parse_toml(s: &str) -> anyhow::Result<FileConfig> {
	toml::from_str(s).context("parse TOML")
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	if let Some(v) = non_empty(env("SPEAKWATCH_BOT_TOKEN")) {
		cfg.bot_token = Some(SecretString::new(v));
		info!("server config: bot_token overridden by env");
	} else if let Some(v) = non_empty(env("TRAQ_BOT_TOKEN")) {
		cfg.bot_token = Some(SecretString::new(v));
		info!("server config: bot_token taken from TRAQ_BOT_TOKEN");
	}

	if let Some(v) = non_empty(env("PORT")) {
		match v.parse::<u16>() {
			Ok(port) => {
				cfg.server.bind = Some(format!("0.0.0.0:{port}"));
				info!(port, "server config: bind overridden by PORT");
			}
			Err(e) => warn!(error = %e, port = %v, "server config: ignoring invalid PORT"),
		}
	}

	if let Some(v) = non_empty(env("SPEAKWATCH_BIND")) {
		cfg.server.bind = Some(v);
		info!("server config: bind overridden by env");
	}

	if let Some(v) = non_empty(env("SPEAKWATCH_METRICS_BIND")) {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = non_empty(env("SPEAKWATCH_UPSTREAM_BASE_URL")) {
		cfg.upstream.base_url = Some(v);
		info!("upstream config: base_url overridden by env");
	}

	if let Some(v) = env("SPEAKWATCH_REQUEST_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
		&& ms > 0
	{
		cfg.upstream.request_timeout = Some(Duration::from_millis(ms));
		info!(ms, "upstream config: request_timeout overridden by env");
	}

	if let Some(v) = env("SPEAKWATCH_INCLUDE_SUSPENDED_USERS")
		&& let Some(include) = parse_env_bool(&v)
	{
		cfg.upstream.include_suspended_users = include;
		info!(include, "upstream config: include_suspended_users overridden by env");
	}

	if let Some(v) = env("SPEAKWATCH_POLL_INTERVAL_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
		&& ms > 0
	{
		cfg.poller.interval = Duration::from_millis(ms);
		info!(ms, "poller config: interval overridden by env");
	}

	if let Some(v) = env("SPEAKWATCH_TIMELINE_LIMIT")
		&& let Ok(limit) = v.trim().parse::<u32>()
		&& limit > 0
	{
		cfg.poller.timeline_limit = limit;
		info!(limit, "poller config: timeline_limit overridden by env");
	}

	if let Some(v) = env("SPEAKWATCH_MAX_PATH_DEPTH")
		&& let Ok(depth) = v.trim().parse::<usize>()
		&& depth > 0
	{
		cfg.directory.max_path_depth = depth;
		info!(depth, "directory config: max_path_depth overridden by env");
	}

	if let Some(v) = env("SPEAKWATCH_CACHE_USER_FALLBACK")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.directory.cache_user_fallback = enabled;
		info!(enabled, "directory config: cache_user_fallback overridden by env");
	}

	if let Some(v) = env("SPEAKWATCH_SUBSCRIBER_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.notifier.subscriber_queue_capacity = capacity;
		info!(capacity, "notifier config: subscriber_queue_capacity overridden by env");
	}

	if let Some(v) = env("SPEAKWATCH_MAX_FRAME_SIZE")
		&& let Ok(max) = v.trim().parse::<usize>()
		&& max > 0
	{
		cfg.notifier.max_frame_size = max;
		info!(max, "notifier config: max_frame_size overridden by env");
	}

	if let Some(v) = env("SPEAKWATCH_DEBUG_NOTIFIER")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.notifier.debug_logs = enabled;
		info!(enabled, "notifier config: debug_logs overridden by env");
	}

	if cfg.poller.interval < Duration::from_secs(1) {
		warn!(
			interval_ms = cfg.poller.interval.as_millis() as u64,
			"poller config: interval below 1s may exceed upstream rate limits"
		);
	}
}
