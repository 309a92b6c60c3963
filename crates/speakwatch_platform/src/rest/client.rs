#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use speakwatch_domain::{ActivityEvent, ChannelEntity, ChannelId, UserEntity, UserId};
use tracing::debug;
use url::Url;

use crate::{SecretString, Upstream, UpstreamError};

const CHANNELS_ENDPOINT: &str = "GET /channels";
const USERS_ENDPOINT: &str = "GET /users";
const TIMELINE_ENDPOINT: &str = "GET /activity/timeline";
const USER_ENDPOINT: &str = "GET /users/{id}";
const CHANNEL_ENDPOINT: &str = "GET /channels/{id}";

pub const DEFAULT_BASE_URL: &str = "https://q.trap.jp/api/v3";

/// Settings for `RestClient`.
#[derive(Debug, Clone)]
pub struct RestConfig {
	/// API root, e.g. `https://q.trap.jp/api/v3`.
	pub base_url: String,

	/// Bot bearer token.
	pub token: SecretString,

	/// Per-request timeout.
	pub request_timeout: Duration,

	/// Include suspended accounts in the bulk user listing.
	pub include_suspended_users: bool,
}

impl RestConfig {
	pub fn new(token: SecretString) -> Self {
		Self {
			base_url: DEFAULT_BASE_URL.to_string(),
			token,
			request_timeout: Duration::from_secs(5),
			include_suspended_users: false,
		}
	}
}

/// Bearer-authenticated REST client for the upstream API.
#[derive(Debug, Clone)]
pub struct RestClient {
	base_url: String,
	token: SecretString,
	include_suspended_users: bool,
	client: reqwest::Client,
}

impl RestClient {
	pub fn new(cfg: RestConfig) -> Result<Self, UpstreamError> {
		Url::parse(cfg.base_url.trim())?;

		let client = reqwest::Client::builder()
			.user_agent(concat!("speakwatch/", env!("CARGO_PKG_VERSION")))
			.timeout(cfg.request_timeout)
			.build()
			.map_err(|source| UpstreamError::Request {
				endpoint: "client builder",
				source,
			})?;

		Ok(Self {
			base_url: cfg.base_url.trim().trim_end_matches('/').to_string(),
			token: cfg.token,
			include_suspended_users: cfg.include_suspended_users,
			client,
		})
	}

	fn url(&self, path_and_query: &str) -> Result<Url, UpstreamError> {
		Ok(Url::parse(&format!("{}{}", self.base_url, path_and_query))?)
	}

	async fn get_json<T: DeserializeOwned>(&self, endpoint: &'static str, url: Url) -> Result<T, UpstreamError> {
		debug!(%endpoint, "upstream request");

		let resp = self
			.client
			.get(url)
			.bearer_auth(self.token.expose().trim())
			.send()
			.await
			.map_err(|source| UpstreamError::Request { endpoint, source })?;

		let status = resp.status();
		if !status.is_success() {
			return Err(UpstreamError::Status {
				endpoint,
				status: status.as_u16(),
			});
		}

		let body = resp
			.text()
			.await
			.map_err(|source| UpstreamError::Request { endpoint, source })?;

		decode(endpoint, &body)
	}
}

#[async_trait]
impl Upstream for RestClient {
	async fn list_channels(&self) -> Result<Vec<ChannelEntity>, UpstreamError> {
		let url = self.url("/channels?include-public=true")?;
		let body: ChannelsResponse = self.get_json(CHANNELS_ENDPOINT, url).await?;
		Ok(body.public)
	}

	async fn list_users(&self) -> Result<Vec<UserEntity>, UpstreamError> {
		let url = self.url(&format!("/users?include-suspended={}", self.include_suspended_users))?;
		self.get_json(USERS_ENDPOINT, url).await
	}

	async fn timeline(&self, limit: u32) -> Result<Vec<ActivityEvent>, UpstreamError> {
		let url = self.url(&format!("/activity/timeline?all=true&limit={limit}"))?;
		self.get_json(TIMELINE_ENDPOINT, url).await
	}

	async fn fetch_user(&self, id: &UserId) -> Result<UserEntity, UpstreamError> {
		let url = self.url(&format!("/users/{}", urlencoding::encode(id.as_str())))?;
		self.get_json(USER_ENDPOINT, url).await
	}

	async fn fetch_channel(&self, id: &ChannelId) -> Result<ChannelEntity, UpstreamError> {
		let url = self.url(&format!("/channels/{}", urlencoding::encode(id.as_str())))?;
		self.get_json(CHANNEL_ENDPOINT, url).await
	}
}

#[derive(Debug, Deserialize)]
struct ChannelsResponse {
	#[serde(default)]
	public: Vec<ChannelEntity>,
}

fn decode<T: DeserializeOwned>(endpoint: &'static str, body: &str) -> Result<T, UpstreamError> {
	serde_json::from_str(body).map_err(|source| UpstreamError::Decode { endpoint, source })
}

#[cfg(test)]
mod tests {
	use super::*;

	fn client(base: &str) -> RestClient {
		let mut cfg = RestConfig::new(SecretString::new("token"));
		cfg.base_url = base.to_string();
		RestClient::new(cfg).expect("client")
	}

	#[test]
	fn urls_keep_the_api_prefix() {
		let c = client("https://q.trap.jp/api/v3/");
		assert_eq!(
			c.url("/activity/timeline?all=true&limit=50").unwrap().as_str(),
			"https://q.trap.jp/api/v3/activity/timeline?all=true&limit=50"
		);
		assert_eq!(
			c.url("/channels?include-public=true").unwrap().as_str(),
			"https://q.trap.jp/api/v3/channels?include-public=true"
		);
	}

	#[test]
	fn rejects_a_relative_base_url() {
		let mut cfg = RestConfig::new(SecretString::new("token"));
		cfg.base_url = "not a url".to_string();
		assert!(matches!(RestClient::new(cfg), Err(UpstreamError::InvalidUrl(_))));
	}

	#[test]
	fn decodes_public_channel_listing() {
		let body = r#"{
			"public": [
				{"id": "b", "name": "general", "parentId": null, "archived": false},
				{"id": "a", "name": "sub", "parentId": "b"}
			],
			"dm": []
		}"#;

		let parsed: ChannelsResponse = decode(CHANNELS_ENDPOINT, body).expect("decode");
		assert_eq!(parsed.public.len(), 2);
		assert_eq!(parsed.public[1].parent().map(ChannelId::as_str), Some("b"));
	}

	#[test]
	fn decodes_user_listing() {
		let body = r#"[{"id": "u1", "name": "alice", "displayName": "Alice", "state": 1}]"#;
		let users: Vec<UserEntity> = decode(USERS_ENDPOINT, body).expect("decode");
		assert_eq!(users, vec![UserEntity::new(UserId::new("u1").unwrap(), "alice")]);
	}

	#[test]
	fn timeline_decode_failure_names_the_endpoint() {
		let err = decode::<Vec<ActivityEvent>>(TIMELINE_ENDPOINT, r#"[{"id": "m1"}]"#).unwrap_err();
		match err {
			UpstreamError::Decode { endpoint, .. } => assert_eq!(endpoint, TIMELINE_ENDPOINT),
			other => panic!("expected Decode, got: {other:?}"),
		}
	}
}
