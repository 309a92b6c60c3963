#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use speakwatch_domain::{ChannelEntity, ChannelId, UserEntity, UserId, WEBHOOK_USERNAME};
use speakwatch_platform::Upstream;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Configuration for `Directory`.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
	/// Cache the `webhook` fallback after a failed user lookup.
	///
	/// When disabled the fallback is still returned, but the next lookup for the
	/// same id tries the upstream again.
	pub cache_user_fallback: bool,
}

impl Default for DirectoryConfig {
	fn default() -> Self {
		Self {
			cache_user_fallback: true,
		}
	}
}

/// Cache sizes, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryStats {
	pub channels: usize,
	pub users: usize,
}

/// Shared id → entity cache that learns unknown ids from the upstream on first use.
///
/// Lookups take a shared lock; a miss registers itself as the single in-flight
/// fetch for that id, releases every lock, fetches, then re-acquires the
/// exclusive lock and keeps whichever value was written first. Concurrent
/// misses for the same id wait for that one fetch instead of issuing their own.
pub struct Directory {
	fetcher: Arc<dyn Upstream>,
	channels: LearningMap<ChannelId, ChannelEntity>,
	users: LearningMap<UserId, String>,
	cfg: DirectoryConfig,
}

impl Directory {
	pub fn new(fetcher: Arc<dyn Upstream>, cfg: DirectoryConfig) -> Self {
		Self {
			fetcher,
			channels: LearningMap::new(),
			users: LearningMap::new(),
			cfg,
		}
	}

	/// Insert (overwrite) entries from the upstream bulk listings.
	pub fn bulk_load(&self, channels: Vec<ChannelEntity>, users: Vec<UserEntity>) {
		self.channels.insert_all(channels.into_iter().map(|ch| (ch.id.clone(), ch)));
		self.users.insert_all(users.into_iter().map(|u| (u.id, u.name)));
	}

	pub fn stats(&self) -> DirectoryStats {
		DirectoryStats {
			channels: self.channels.len(),
			users: self.users.len(),
		}
	}

	/// Display name for a user; `webhook` when the upstream cannot tell us.
	pub async fn resolve_user(&self, id: &UserId) -> String {
		let fetcher = Arc::clone(&self.fetcher);
		let cache_fallback = self.cfg.cache_user_fallback;

		let name = self
			.users
			.resolve_with(id, move || async move {
				metrics::counter!("speakwatch_directory_fetch_total", "kind" => "user").increment(1);
				match fetcher.fetch_user(id).await {
					Ok(user) => {
						debug!(user_id = %id, name = %user.name, "directory: learned user");
						Learned::Cache(user.name)
					}
					Err(e) => {
						metrics::counter!("speakwatch_directory_fallback_total").increment(1);
						warn!(user_id = %id, error = %e, "directory: user lookup failed; using webhook fallback");
						let fallback = WEBHOOK_USERNAME.to_string();
						if cache_fallback {
							Learned::Cache(fallback)
						} else {
							Learned::Uncached(Some(fallback))
						}
					}
				}
			})
			.await;

		name.unwrap_or_else(|| WEBHOOK_USERNAME.to_string())
	}

	/// Channel entity for an id, or `None` if it is unknown upstream too.
	pub async fn resolve_channel(&self, id: &ChannelId) -> Option<ChannelEntity> {
		let fetcher = Arc::clone(&self.fetcher);

		self.channels
			.resolve_with(id, move || async move {
				metrics::counter!("speakwatch_directory_fetch_total", "kind" => "channel").increment(1);
				match fetcher.fetch_channel(id).await {
					Ok(channel) => {
						debug!(channel_id = %id, name = %channel.name, "directory: learned channel");
						Learned::Cache(channel)
					}
					Err(e) if e.is_not_found() => {
						debug!(channel_id = %id, "directory: channel not found upstream");
						Learned::Uncached(None)
					}
					Err(e) => {
						warn!(channel_id = %id, error = %e, "directory: channel lookup failed");
						Learned::Uncached(None)
					}
				}
			})
			.await
	}
}

/// Result of a single-entity fetch.
enum Learned<V> {
	/// Store the value unless another writer already did.
	Cache(V),

	/// Hand the value to the callers waiting on this fetch without storing it.
	Uncached(Option<V>),
}

type Pending<V> = watch::Receiver<Option<Option<V>>>;

struct LearningMap<K, V> {
	slots: RwLock<Slots<K, V>>,
}

struct Slots<K, V> {
	entries: HashMap<K, V>,
	inflight: HashMap<K, Pending<V>>,
}

enum Claim<V> {
	Hit(V),
	Wait(Pending<V>),
	Lead(watch::Sender<Option<Option<V>>>),
}

impl<K, V> LearningMap<K, V>
where
	K: Clone + Eq + Hash,
	V: Clone,
{
	fn new() -> Self {
		Self {
			slots: RwLock::new(Slots {
				entries: HashMap::new(),
				inflight: HashMap::new(),
			}),
		}
	}

	fn len(&self) -> usize {
		self.slots.read().entries.len()
	}

	fn insert_all(&self, items: impl IntoIterator<Item = (K, V)>) {
		let mut slots = self.slots.write();
		slots.entries.extend(items);
	}

	fn claim(&self, key: &K) -> Claim<V> {
		if let Some(v) = self.slots.read().entries.get(key) {
			return Claim::Hit(v.clone());
		}

		let mut slots = self.slots.write();
		if let Some(v) = slots.entries.get(key) {
			return Claim::Hit(v.clone());
		}

		if let Some(pending) = slots.inflight.get(key)
			&& pending.has_changed().is_ok()
		{
			return Claim::Wait(pending.clone());
		}

		let (tx, rx) = watch::channel(None);
		slots.inflight.insert(key.clone(), rx);
		Claim::Lead(tx)
	}

	async fn resolve_with<F, Fut>(&self, key: &K, fetch: F) -> Option<V>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Learned<V>>,
	{
		let tx = loop {
			match self.claim(key) {
				Claim::Hit(v) => return Some(v),
				Claim::Wait(mut pending) => {
					let outcome = pending.wait_for(Option::is_some).await.map(|v| v.clone()).ok().flatten();
					match outcome {
						Some(outcome) => return outcome,
						// Leader was dropped mid-fetch; claim again.
						None => continue,
					}
				}
				Claim::Lead(tx) => break tx,
			}
		};

		let mut lead = LeadGuard {
			slots: &self.slots,
			key: key.clone(),
			tx: Some(tx),
		};

		let learned = fetch().await;

		let resolved = {
			let mut slots = self.slots.write();
			slots.inflight.remove(key);
			match learned {
				Learned::Cache(v) => Some(slots.entries.entry(key.clone()).or_insert(v).clone()),
				Learned::Uncached(v) => slots.entries.get(key).cloned().or(v),
			}
		};

		lead.finish(resolved.clone());
		resolved
	}
}

/// Wakes followers when the leading fetch completes, and clears the in-flight
/// marker if the leader is dropped before that.
struct LeadGuard<'a, K: Eq + Hash, V> {
	slots: &'a RwLock<Slots<K, V>>,
	key: K,
	tx: Option<watch::Sender<Option<Option<V>>>>,
}

impl<K: Eq + Hash, V> LeadGuard<'_, K, V> {
	fn finish(&mut self, resolved: Option<V>) {
		if let Some(tx) = self.tx.take() {
			tx.send_replace(Some(resolved));
		}
	}
}

impl<K: Eq + Hash, V> Drop for LeadGuard<'_, K, V> {
	fn drop(&mut self) {
		let Some(tx) = self.tx.take() else {
			return;
		};
		drop(tx);

		let mut slots = self.slots.write();
		if slots.inflight.get(&self.key).is_some_and(|p| p.has_changed().is_err()) {
			slots.inflight.remove(&self.key);
		}
	}
}
