#![forbid(unsafe_code)]

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use speakwatch_domain::{ActivityEvent, ChannelEntity, ChannelId, ROOT_CHANNEL_ID, UserEntity, UserId};
use speakwatch_platform::{Upstream, UpstreamError};
use tracing::debug;

const DEMO_CHANNELS: &[(&str, &str, &str)] = &[
	("demo-general", "general", ROOT_CHANNEL_ID),
	("demo-random", "random", ROOT_CHANNEL_ID),
	("demo-random-sub", "sub", "demo-random"),
];

/// Only reachable through single-entity learning.
const DEMO_HIDDEN_CHANNEL: (&str, &str, &str) = ("demo-hidden", "hidden", "demo-general");

const DEMO_USERS: &[(&str, &str)] = &[("demo-alice", "alice"), ("demo-bob", "bob")];

/// Only reachable through single-entity learning.
const DEMO_HIDDEN_USER: (&str, &str) = ("demo-carol", "carol");

/// Sender id that never resolves, to exercise the webhook fallback.
const DEMO_WEBHOOK_USER: &str = "demo-webhook";

/// In-process upstream for local runs without a bot token.
///
/// Every timeline call appends one synthetic message so the poller always has
/// something new to publish.
pub struct DemoUpstream {
	history_len: usize,
	state: Mutex<DemoState>,
}

#[derive(Default)]
struct DemoState {
	seq: u64,
	timeline: VecDeque<ActivityEvent>,
}

impl DemoUpstream {
	pub fn new() -> Self {
		Self {
			history_len: 50,
			state: Mutex::new(DemoState::default()),
		}
	}

	fn channel(id: &str, name: &str, parent: &str) -> Result<ChannelEntity, UpstreamError> {
		Ok(ChannelEntity::new(
			demo_id(id)?,
			name,
			Some(demo_id(parent)?),
		))
	}

	fn make_event(seq: u64) -> Result<ActivityEvent, UpstreamError> {
		let channels: Vec<&str> = DEMO_CHANNELS
			.iter()
			.map(|(id, _, _)| *id)
			.chain([DEMO_HIDDEN_CHANNEL.0])
			.collect();
		let users: Vec<&str> = DEMO_USERS
			.iter()
			.map(|(id, _)| *id)
			.chain([DEMO_HIDDEN_USER.0, DEMO_WEBHOOK_USER])
			.collect();

		let channel = channels[(seq as usize) % channels.len()];
		let user = users[(seq as usize / 2) % users.len()];

		Ok(ActivityEvent {
			id: demo_id(&format!("demo-msg-{seq}"))?,
			user_id: demo_id(user)?,
			channel_id: demo_id(channel)?,
			content: format!("demo message #{seq}"),
			created_at: Utc::now(),
		})
	}
}

impl Default for DemoUpstream {
	fn default() -> Self {
		Self::new()
	}
}

fn demo_id<T>(raw: &str) -> Result<T, UpstreamError>
where
	T: std::str::FromStr,
{
	raw.parse().map_err(|_| UpstreamError::Status {
		endpoint: "demo",
		status: 500,
	})
}

fn not_found(endpoint: &'static str) -> UpstreamError {
	UpstreamError::Status { endpoint, status: 404 }
}

#[async_trait]
impl Upstream for DemoUpstream {
	async fn list_channels(&self) -> Result<Vec<ChannelEntity>, UpstreamError> {
		DEMO_CHANNELS
			.iter()
			.map(|(id, name, parent)| Self::channel(id, name, parent))
			.collect()
	}

	async fn list_users(&self) -> Result<Vec<UserEntity>, UpstreamError> {
		DEMO_USERS
			.iter()
			.map(|(id, name)| Ok(UserEntity::new(demo_id(id)?, *name)))
			.collect()
	}

	async fn timeline(&self, limit: u32) -> Result<Vec<ActivityEvent>, UpstreamError> {
		let mut state = self.state.lock();
		state.seq += 1;
		let ev = Self::make_event(state.seq)?;
		debug!(event_id = %ev.id, channel_id = %ev.channel_id, "demo upstream: new timeline event");

		state.timeline.push_front(ev);
		state.timeline.truncate(self.history_len);

		Ok(state.timeline.iter().take(limit as usize).cloned().collect())
	}

	async fn fetch_user(&self, id: &UserId) -> Result<UserEntity, UpstreamError> {
		DEMO_USERS
			.iter()
			.copied()
			.chain([DEMO_HIDDEN_USER])
			.find(|(uid, _)| *uid == id.as_str())
			.map(|(_, name)| UserEntity::new(id.clone(), name))
			.ok_or_else(|| not_found("GET /users/{id}"))
	}

	async fn fetch_channel(&self, id: &ChannelId) -> Result<ChannelEntity, UpstreamError> {
		let (cid, name, parent) = DEMO_CHANNELS
			.iter()
			.copied()
			.chain([DEMO_HIDDEN_CHANNEL])
			.find(|(cid, _, _)| *cid == id.as_str())
			.ok_or_else(|| not_found("GET /channels/{id}"))?;
		Self::channel(cid, name, parent)
	}
}
