#![forbid(unsafe_code)]

pub mod rest;

use std::fmt;

use async_trait::async_trait;
use speakwatch_domain::{ActivityEvent, ChannelEntity, ChannelId, UserEntity, UserId};
use thiserror::Error;

pub use rest::{RestClient, RestConfig};

/// Upstream chat platform API, as consumed by the relay.
///
/// Implementations must be cheap to share behind an `Arc`; the directory calls
/// the single-entity fetches concurrently from many tasks.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
	/// Bulk listing of public channels.
	async fn list_channels(&self) -> Result<Vec<ChannelEntity>, UpstreamError>;

	/// Bulk listing of users.
	async fn list_users(&self) -> Result<Vec<UserEntity>, UpstreamError>;

	/// Most recent timeline events across all public channels, newest first.
	async fn timeline(&self, limit: u32) -> Result<Vec<ActivityEvent>, UpstreamError>;

	/// Fetch one user by id.
	async fn fetch_user(&self, id: &UserId) -> Result<UserEntity, UpstreamError>;

	/// Fetch one channel by id.
	async fn fetch_channel(&self, id: &ChannelId) -> Result<ChannelEntity, UpstreamError>;
}

/// Upstream call failures.
#[derive(Debug, Error)]
pub enum UpstreamError {
	#[error("invalid upstream url: {0}")]
	InvalidUrl(#[from] url::ParseError),

	#[error("{endpoint}: request failed: {source}")]
	Request {
		endpoint: &'static str,
		#[source]
		source: reqwest::Error,
	},

	#[error("{endpoint}: unexpected status {status}")]
	Status {
		endpoint: &'static str,
		status: u16,
	},

	#[error("{endpoint}: decode failed: {source}")]
	Decode {
		endpoint: &'static str,
		#[source]
		source: serde_json::Error,
	},
}

impl UpstreamError {
	/// Short label for logs and metrics.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::InvalidUrl(_) => "invalid_url",
			Self::Request { .. } => "request",
			Self::Status { .. } => "status",
			Self::Decode { .. } => "decode",
		}
	}

	/// Whether the upstream said the entity does not exist.
	pub const fn is_not_found(&self) -> bool {
		matches!(self, Self::Status { status: 404, .. })
	}
}

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_blank(&self) -> bool {
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
