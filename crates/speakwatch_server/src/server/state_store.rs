#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use speakwatch_domain::ResolvedChange;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Last known speaker per channel path.
#[derive(Debug, Default)]
pub struct StateStore {
	speakers: RwLock<HashMap<String, String>>,
}

impl StateStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Copy of the current `path -> username` map.
	pub async fn snapshot(&self) -> BTreeMap<String, String> {
		self.begin_snapshot().await.to_map()
	}

	#[allow(dead_code)]
	pub async fn get(&self, channel_path: &str) -> Option<String> {
		self.speakers.read().await.get(channel_path).cloned()
	}

	/// Exclusive scope for applying a batch of changes.
	pub(crate) async fn begin_publish(&self) -> PublishScope<'_> {
		PublishScope {
			speakers: self.speakers.write().await,
		}
	}

	/// Shared scope that keeps writers out while a snapshot is handed off.
	pub(crate) async fn begin_snapshot(&self) -> SnapshotScope<'_> {
		SnapshotScope {
			speakers: self.speakers.read().await,
		}
	}
}

pub(crate) struct PublishScope<'a> {
	speakers: RwLockWriteGuard<'a, HashMap<String, String>>,
}

impl PublishScope<'_> {
	/// Record a change; returns the previous speaker for the path.
	pub(crate) fn record(&mut self, change: &ResolvedChange) -> Option<String> {
		self.speakers
			.insert(change.channel_path.clone(), change.username.clone())
	}
}

pub(crate) struct SnapshotScope<'a> {
	speakers: RwLockReadGuard<'a, HashMap<String, String>>,
}

impl SnapshotScope<'_> {
	pub(crate) fn to_map(&self) -> BTreeMap<String, String> {
		self.speakers.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
	}
}
