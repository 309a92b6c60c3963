#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use speakwatch_domain::{ActivityEvent, ResolvedChange};
use speakwatch_platform::Upstream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::server::directory::Directory;
use crate::server::path::PathResolver;

/// One tick's worth of deduplicated changes, oldest first.
pub type ChangeBatch = Vec<ResolvedChange>;

/// Poller settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
	pub interval: Duration,
	pub timeline_limit: u32,
}

impl Default for PollerConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(15),
			timeline_limit: 50,
		}
	}
}

/// Boundary below which timeline events count as already processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
	pub fn new(at: DateTime<Utc>) -> Self {
		Self(at)
	}

	pub fn get(self) -> DateTime<Utc> {
		self.0
	}

	/// Whether an event at `at` has not been processed yet.
	pub fn admits(self, at: DateTime<Utc>) -> bool {
		at > self.0
	}

	/// Move forward to `at`; never moves backwards.
	pub fn advance_to(&mut self, at: DateTime<Utc>) -> bool {
		if at > self.0 {
			self.0 = at;
			true
		} else {
			false
		}
	}
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
	/// Timeline fetch failed; nothing changed.
	Skipped { reason: &'static str },

	Processed {
		fetched: usize,
		fresh: usize,
		dropped: usize,
		published: usize,
	},

	/// The publisher is gone; the poller should stop.
	HandoffClosed,
}

/// Periodic timeline poller feeding deduplicated changes to the publisher.
pub struct Poller {
	upstream: Arc<dyn Upstream>,
	directory: Arc<Directory>,
	resolver: PathResolver,
	watermark: Watermark,
	cfg: PollerConfig,
	changes_tx: mpsc::Sender<ChangeBatch>,
}

impl Poller {
	pub fn new(
		upstream: Arc<dyn Upstream>,
		directory: Arc<Directory>,
		resolver: PathResolver,
		watermark: Watermark,
		cfg: PollerConfig,
		changes_tx: mpsc::Sender<ChangeBatch>,
	) -> Self {
		Self {
			upstream,
			directory,
			resolver,
			watermark,
			cfg,
			changes_tx,
		}
	}

	pub fn watermark(&self) -> Watermark {
		self.watermark
	}

	/// Run ticks on the configured interval until the publisher goes away.
	pub async fn run(mut self) {
		let mut interval = tokio::time::interval(self.cfg.interval);
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		info!(
			interval_ms = self.cfg.interval.as_millis() as u64,
			limit = self.cfg.timeline_limit,
			since = %self.watermark.get(),
			"poller started: watching all public channels"
		);

		loop {
			interval.tick().await;

			if self.tick().await == TickOutcome::HandoffClosed {
				info!("poller exiting (publisher closed)");
				break;
			}
		}
	}

	/// Fetch the timeline once and hand the resulting changes to the publisher.
	pub async fn tick(&mut self) -> TickOutcome {
		metrics::counter!("speakwatch_poll_ticks_total").increment(1);

		let events = match self.upstream.timeline(self.cfg.timeline_limit).await {
			Ok(events) => events,
			Err(e) => {
				metrics::counter!("speakwatch_poll_failures_total", "kind" => e.kind()).increment(1);
				warn!(error = %e, "polling failed; skipping tick");
				return TickOutcome::Skipped { reason: e.kind() };
			}
		};

		let fetched = events.len();
		let (fresh, newest) = fresh_events(events, self.watermark);
		let fresh_count = fresh.len();

		let mut resolved = Vec::with_capacity(fresh_count);
		let mut dropped = 0usize;
		for ev in &fresh {
			match self.resolve_event(ev).await {
				Some(change) => resolved.push(change),
				None => dropped += 1,
			}
		}

		if let Some(newest) = newest {
			self.watermark.advance_to(newest);
		}

		if dropped > 0 {
			metrics::counter!("speakwatch_events_dropped_total").increment(dropped as u64);
		}

		let batch = collapse_by_path(resolved);
		let published = batch.len();

		debug!(
			fetched,
			fresh = fresh_count,
			dropped,
			published,
			watermark = %self.watermark.get(),
			"poll tick processed"
		);

		if !batch.is_empty() && self.changes_tx.send(batch).await.is_err() {
			return TickOutcome::HandoffClosed;
		}

		TickOutcome::Processed {
			fetched,
			fresh: fresh_count,
			dropped,
			published,
		}
	}

	async fn resolve_event(&self, ev: &ActivityEvent) -> Option<ResolvedChange> {
		let Some(path) = self.resolver.resolve(&ev.channel_id).await else {
			debug!(event_id = %ev.id, channel_id = %ev.channel_id, "dropping event: channel path unresolved");
			return None;
		};

		let username = self.directory.resolve_user(&ev.user_id).await;
		if username.trim().is_empty() {
			debug!(event_id = %ev.id, user_id = %ev.user_id, "dropping event: empty username");
			return None;
		}

		Some(ResolvedChange::new(path, username))
	}
}

/// Events strictly after the watermark, oldest first, plus the newest timestamp among them.
///
/// The upstream lists newest first; reversing before the stable sort keeps
/// feed order for events sharing a timestamp.
pub(crate) fn fresh_events(
	events: Vec<ActivityEvent>,
	watermark: Watermark,
) -> (Vec<ActivityEvent>, Option<DateTime<Utc>>) {
	let mut fresh: Vec<ActivityEvent> = events
		.into_iter()
		.rev()
		.filter(|ev| watermark.admits(ev.created_at))
		.collect();
	fresh.sort_by_key(|ev| ev.created_at);

	let newest = fresh.last().map(|ev| ev.created_at);
	(fresh, newest)
}

/// Keep only the last change per path, ordered by when that last change happened.
pub(crate) fn collapse_by_path(changes: Vec<ResolvedChange>) -> ChangeBatch {
	let mut last_index: HashMap<&str, usize> = HashMap::with_capacity(changes.len());
	for (idx, change) in changes.iter().enumerate() {
		last_index.insert(change.channel_path.as_str(), idx);
	}

	let keep: Vec<bool> = changes
		.iter()
		.enumerate()
		.map(|(idx, change)| last_index.get(change.channel_path.as_str()) == Some(&idx))
		.collect();

	changes
		.into_iter()
		.zip(keep)
		.filter_map(|(change, keep)| keep.then_some(change))
		.collect()
}

/// Spawn the poller as a background task.
pub fn spawn_poller(poller: Poller) -> JoinHandle<()> {
	tokio::spawn(poller.run())
}
