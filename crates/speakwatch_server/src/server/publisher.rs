#![forbid(unsafe_code)]

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::server::notifier::Notifier;
use crate::server::poller::ChangeBatch;

/// Default number of tick batches buffered between poller and publisher.
pub const DEFAULT_CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Settings for the change publisher.
#[derive(Debug, Clone, Default)]
pub struct PublisherConfig {
	pub debug_log_batches: bool,
}

/// Build the poller → publisher handoff channel.
pub fn change_channel(capacity: usize) -> (mpsc::Sender<ChangeBatch>, mpsc::Receiver<ChangeBatch>) {
	mpsc::channel(capacity.max(1))
}

/// Consumes tick batches from the poller and publishes them through the notifier.
#[derive(Debug)]
pub struct ChangePublisher {
	cfg: PublisherConfig,
	notifier: Notifier,
	changes_rx: mpsc::Receiver<ChangeBatch>,
}

impl ChangePublisher {
	pub fn new(changes_rx: mpsc::Receiver<ChangeBatch>, notifier: Notifier, cfg: PublisherConfig) -> Self {
		Self {
			cfg,
			notifier,
			changes_rx,
		}
	}

	/// Run until the poller side of the channel is closed.
	pub async fn run(mut self) {
		info!("change publisher started");

		while let Some(batch) = self.changes_rx.recv().await {
			if self.cfg.debug_log_batches {
				debug!(changes = batch.len(), "publishing change batch");
			}

			self.notifier.publish(&batch).await;
		}

		info!("change publisher exiting (poller closed)");
	}
}

/// Spawn a background task that publishes poller batches.
pub fn spawn_publisher(
	changes_rx: mpsc::Receiver<ChangeBatch>,
	notifier: Notifier,
	cfg: PublisherConfig,
) -> JoinHandle<()> {
	let publisher = ChangePublisher::new(changes_rx, notifier, cfg);
	tokio::spawn(publisher.run())
}
