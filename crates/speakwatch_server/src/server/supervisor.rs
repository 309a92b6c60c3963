#![forbid(unsafe_code)]

use std::future::Future;

use anyhow::bail;
use tokio::task::{JoinError, JoinHandle};
use tracing::error;

use crate::server::health::HealthState;

/// Background tasks the listener depends on.
pub struct BackgroundTasks {
	pub poller: JoinHandle<()>,
	pub publisher: JoinHandle<()>,
}

/// Runs `serve` until it returns or a background task ends.
///
/// A background task never ends on its own, so either one finishing clears
/// readiness and is reported as an error.
pub async fn supervise<F>(health: &HealthState, serve: F, tasks: BackgroundTasks) -> anyhow::Result<()>
where
	F: Future<Output = anyhow::Result<()>>,
{
	let BackgroundTasks { poller, publisher } = tasks;
	tokio::select! {
		res = serve => res,
		res = poller => background_ended(health, "poller", res),
		res = publisher => background_ended(health, "publisher", res),
	}
}

fn background_ended(health: &HealthState, task: &'static str, res: Result<(), JoinError>) -> anyhow::Result<()> {
	health.mark_not_ready();
	match res {
		Ok(()) => {
			error!(task, "background task exited");
			bail!("{task} task exited")
		}
		Err(e) if e.is_panic() => {
			error!(task, "background task panicked");
			bail!("{task} task panicked")
		}
		Err(e) => {
			error!(task, error = %e, "background task cancelled");
			bail!("{task} task cancelled")
		}
	}
}
