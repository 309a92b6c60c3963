#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use speakwatch_domain::{ActivityEvent, ChannelEntity, ChannelId, ROOT_CHANNEL_ID, UserEntity, UserId};
use speakwatch_platform::{Upstream, UpstreamError};

static LOG_INIT: OnceLock<()> = OnceLock::new();

/// Enable test logs with `SPEAKWATCH_TEST_LOG=1`.
pub(crate) fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var("SPEAKWATCH_TEST_LOG").is_ok() {
			let _ = tracing_subscriber::fmt()
				.with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
				.with_test_writer()
				.try_init();
		}
	});
}

pub(crate) fn cid(raw: &str) -> ChannelId {
	ChannelId::new(raw).expect("valid ChannelId")
}

pub(crate) fn uid(raw: &str) -> UserId {
	UserId::new(raw).expect("valid UserId")
}

pub(crate) fn channel(id: &str, name: &str, parent: Option<&str>) -> ChannelEntity {
	ChannelEntity::new(cid(id), name, Some(cid(parent.unwrap_or(ROOT_CHANNEL_ID))))
}

pub(crate) fn user(id: &str, name: &str) -> UserEntity {
	UserEntity::new(uid(id), name)
}

/// Fixed instant `secs` seconds after an arbitrary epoch.
pub(crate) fn at(secs: i64) -> DateTime<Utc> {
	DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
}

pub(crate) fn event(id: &str, user_id: &str, channel_id: &str, secs: i64) -> ActivityEvent {
	ActivityEvent {
		id: id.parse().expect("valid EventId"),
		user_id: uid(user_id),
		channel_id: cid(channel_id),
		content: format!("message {id}"),
		created_at: at(secs),
	}
}

/// Upstream double with canned entities and a queue of timeline responses.
///
/// Only entities added through `with_channel`/`with_user` are visible to the
/// single-entity fetches; `listed_*` controls what the bulk listings return.
#[derive(Default)]
pub(crate) struct ScriptedUpstream {
	channels: Mutex<HashMap<ChannelId, ChannelEntity>>,
	users: Mutex<HashMap<UserId, UserEntity>>,
	listed_channels: Mutex<Vec<ChannelEntity>>,
	listed_users: Mutex<Vec<UserEntity>>,
	timelines: Mutex<VecDeque<Result<Vec<ActivityEvent>, u16>>>,
	failing: Mutex<HashSet<String>>,
	fetch_delay: Option<Duration>,

	pub(crate) user_fetches: AtomicUsize,
	pub(crate) channel_fetches: AtomicUsize,
	pub(crate) timeline_calls: AtomicUsize,
}

impl ScriptedUpstream {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Delay every single-entity fetch, so concurrent callers overlap.
	pub(crate) fn with_fetch_delay(mut self, delay: Duration) -> Self {
		self.fetch_delay = Some(delay);
		self
	}

	pub(crate) fn with_channel(self, ch: ChannelEntity) -> Self {
		self.channels.lock().insert(ch.id.clone(), ch);
		self
	}

	pub(crate) fn with_user(self, u: UserEntity) -> Self {
		self.users.lock().insert(u.id.clone(), u);
		self
	}

	/// Visible to both the bulk listing and the single fetch.
	pub(crate) fn with_listed_channel(self, ch: ChannelEntity) -> Self {
		self.listed_channels.lock().push(ch.clone());
		self.with_channel(ch)
	}

	pub(crate) fn with_listed_user(self, u: UserEntity) -> Self {
		self.listed_users.lock().push(u.clone());
		self.with_user(u)
	}

	/// Make single-entity fetches for `id` fail with a 500.
	pub(crate) fn failing(self, id: &str) -> Self {
		self.failing.lock().insert(id.to_string());
		self
	}

	pub(crate) fn push_timeline(&self, events: Vec<ActivityEvent>) {
		self.timelines.lock().push_back(Ok(events));
	}

	pub(crate) fn push_timeline_failure(&self, status: u16) {
		self.timelines.lock().push_back(Err(status));
	}

	pub(crate) fn user_fetches(&self) -> usize {
		self.user_fetches.load(Ordering::SeqCst)
	}

	pub(crate) fn channel_fetches(&self) -> usize {
		self.channel_fetches.load(Ordering::SeqCst)
	}

	async fn pause(&self) {
		if let Some(delay) = self.fetch_delay {
			tokio::time::sleep(delay).await;
		}
	}

	fn is_failing(&self, id: &str) -> bool {
		self.failing.lock().contains(id)
	}
}

#[async_trait]
impl Upstream for ScriptedUpstream {
	async fn list_channels(&self) -> Result<Vec<ChannelEntity>, UpstreamError> {
		Ok(self.listed_channels.lock().clone())
	}

	async fn list_users(&self) -> Result<Vec<UserEntity>, UpstreamError> {
		Ok(self.listed_users.lock().clone())
	}

	async fn timeline(&self, limit: u32) -> Result<Vec<ActivityEvent>, UpstreamError> {
		self.timeline_calls.fetch_add(1, Ordering::SeqCst);
		let next = self.timelines.lock().pop_front();
		match next {
			Some(Ok(mut events)) => {
				events.truncate(limit as usize);
				Ok(events)
			}
			Some(Err(status)) => Err(UpstreamError::Status {
				endpoint: "GET /activity/timeline",
				status,
			}),
			None => Ok(Vec::new()),
		}
	}

	async fn fetch_user(&self, id: &UserId) -> Result<UserEntity, UpstreamError> {
		self.user_fetches.fetch_add(1, Ordering::SeqCst);
		self.pause().await;

		if self.is_failing(id.as_str()) {
			return Err(UpstreamError::Status {
				endpoint: "GET /users/{id}",
				status: 500,
			});
		}

		let found = self.users.lock().get(id).cloned();
		found.ok_or(UpstreamError::Status {
			endpoint: "GET /users/{id}",
			status: 404,
		})
	}

	async fn fetch_channel(&self, id: &ChannelId) -> Result<ChannelEntity, UpstreamError> {
		self.channel_fetches.fetch_add(1, Ordering::SeqCst);
		self.pause().await;

		if self.is_failing(id.as_str()) {
			return Err(UpstreamError::Status {
				endpoint: "GET /channels/{id}",
				status: 500,
			});
		}

		let found = self.channels.lock().get(id).cloned();
		found.ok_or(UpstreamError::Status {
			endpoint: "GET /channels/{id}",
			status: 404,
		})
	}
}
