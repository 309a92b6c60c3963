#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use speakwatch_domain::ResolvedChange;
use speakwatch_protocol::{CodecError, DEFAULT_MAX_FRAME_SIZE, ServerMessage, encode_message};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::server::state_store::{SnapshotScope, StateStore};

/// Encoded JSON text frame, shared between subscriber queues.
pub type Frame = Arc<str>;

/// Fans out speaker changes to every connected subscriber.
#[derive(Debug, Clone)]
pub struct Notifier {
	inner: Arc<Mutex<Inner>>,
	state: Arc<StateStore>,
	cfg: NotifierConfig,
}

/// Configuration for `Notifier`.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
	/// Maximum number of queued frames per subscriber before it is dropped.
	pub subscriber_queue_capacity: usize,

	pub max_frame_size: usize,

	pub debug_logs: bool,
}

impl Default for NotifierConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 256,
			max_frame_size: DEFAULT_MAX_FRAME_SIZE,
			debug_logs: false,
		}
	}
}

/// Subscriber identifier, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sub-{}", self.0)
	}
}

/// A registered subscriber. The first frame is always the `INIT` snapshot.
#[derive(Debug)]
pub struct Subscription {
	pub id: SubscriberId,
	pub frames: mpsc::Receiver<Frame>,
}

impl Notifier {
	pub fn new(state: Arc<StateStore>, cfg: NotifierConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			state,
			cfg,
		}
	}

	/// Register a subscriber and queue the current state as its first message.
	///
	/// The state scope is held until the subscriber is registered, so every
	/// change is either part of the snapshot or delivered afterwards.
	pub async fn subscribe(&self) -> Result<Subscription, CodecError> {
		let snapshot = self.state.begin_snapshot().await;
		let init = self.snapshot_for(&snapshot)?;

		let (tx, rx) = mpsc::channel(self.cfg.subscriber_queue_capacity.max(1));
		// Capacity is at least one and `rx` is still held, so this cannot fail.
		let _ = tx.try_send(init);

		let mut inner = self.inner.lock().await;
		inner.next_id += 1;
		let id = SubscriberId(inner.next_id);
		inner.subscribers.push((id, tx));
		drop(snapshot);

		metrics::gauge!("speakwatch_subscribers").set(inner.subscribers.len() as f64);
		if self.cfg.debug_logs {
			debug!(subscriber = %id, subs = inner.subscribers.len(), "notifier: subscribed");
		}

		Ok(Subscription { id, frames: rx })
	}

	/// Remove a subscriber; returns whether it was still registered.
	pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
		let mut inner = self.inner.lock().await;
		let before = inner.subscribers.len();
		inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
		let removed = inner.subscribers.len() != before;

		metrics::gauge!("speakwatch_subscribers").set(inner.subscribers.len() as f64);
		if self.cfg.debug_logs && removed {
			debug!(subscriber = %id, subs = inner.subscribers.len(), "notifier: unsubscribed");
		}

		removed
	}

	/// Apply a batch to the state store and broadcast it, as one exclusive scope.
	pub async fn publish(&self, batch: &[ResolvedChange]) {
		if batch.is_empty() {
			return;
		}

		let mut scope = self.state.begin_publish().await;
		let mut inner = self.inner.lock().await;

		for change in batch {
			scope.record(change);
			info!(channel_path = %change.channel_path, username = %change.username, "polled");

			let frame = match encode_message(&ServerMessage::update(change), self.cfg.max_frame_size) {
				Ok(text) => Frame::from(text),
				Err(e) => {
					warn!(channel_path = %change.channel_path, error = %e, "notifier: dropping unencodable update");
					continue;
				}
			};

			let evicted = inner.fan_out(&frame);
			if evicted > 0 {
				metrics::counter!("speakwatch_subscribers_evicted_total").increment(evicted as u64);
				debug!(evicted, "notifier: removed subscribers with full or closed queues");
			}
		}

		metrics::counter!("speakwatch_changes_published_total").increment(batch.len() as u64);
		metrics::gauge!("speakwatch_subscribers").set(inner.subscribers.len() as f64);
	}

	/// Publish a single change.
	#[allow(dead_code)]
	pub async fn broadcast(&self, change: &ResolvedChange) {
		self.publish(std::slice::from_ref(change)).await;
	}

	/// `INIT` frame for a new subscriber, built from the state visible in `scope`.
	fn snapshot_for(&self, scope: &SnapshotScope<'_>) -> Result<Frame, CodecError> {
		let init = encode_message(&ServerMessage::init(scope.to_map()), self.cfg.max_frame_size)?;
		Ok(Frame::from(init))
	}

	pub async fn subscriber_count(&self) -> usize {
		let inner = self.inner.lock().await;
		inner.subscribers.iter().filter(|(_, tx)| !tx.is_closed()).count()
	}
}

#[derive(Debug, Default)]
struct Inner {
	next_id: u64,
	subscribers: Vec<(SubscriberId, mpsc::Sender<Frame>)>,
}

impl Inner {
	/// Queue a frame for every subscriber; full or closed queues are removed.
	fn fan_out(&mut self, frame: &Frame) -> usize {
		let before = self.subscribers.len();
		self.subscribers.retain(|(id, tx)| match tx.try_send(Arc::clone(frame)) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(_)) => {
				warn!(subscriber = %id, "notifier: subscriber queue full; disconnecting slow consumer");
				false
			}
			Err(mpsc::error::TrySendError::Closed(_)) => false,
		});
		before - self.subscribers.len()
	}
}
