#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use speakwatch_domain::{CHANNEL_PATH_PREFIX, ChannelId};
use tracing::{debug, warn};

use crate::server::directory::Directory;

/// Hop limit used when none is configured.
pub const DEFAULT_MAX_PATH_DEPTH: usize = 64;

/// Builds `/channels/<root>/.../<leaf>` paths by walking channel parents.
#[derive(Clone)]
pub struct PathResolver {
	directory: Arc<Directory>,
	max_depth: usize,
}

impl PathResolver {
	pub fn new(directory: Arc<Directory>, max_depth: usize) -> Self {
		Self {
			directory,
			max_depth: max_depth.max(1),
		}
	}

	/// Resolve a channel id to its full path.
	///
	/// Returns `None` if any hop is unknown, the chain revisits a channel, or it
	/// is longer than the configured depth. Partial paths are never returned.
	pub async fn resolve(&self, channel_id: &ChannelId) -> Option<String> {
		let mut names: Vec<String> = Vec::new();
		let mut visited: HashSet<ChannelId> = HashSet::new();
		let mut current = channel_id.clone();

		loop {
			if names.len() >= self.max_depth {
				warn!(channel_id = %channel_id, max_depth = self.max_depth, "path resolver: chain too deep");
				return None;
			}

			if !visited.insert(current.clone()) {
				warn!(channel_id = %channel_id, at = %current, "path resolver: parent cycle");
				return None;
			}

			let Some(channel) = self.directory.resolve_channel(&current).await else {
				debug!(channel_id = %channel_id, missing = %current, "path resolver: unresolved hop");
				return None;
			};

			let parent = channel.parent().cloned();
			names.push(channel.name);

			match parent {
				Some(parent) => current = parent,
				None => break,
			}
		}

		let mut path = String::from(CHANNEL_PATH_PREFIX);
		for name in names.iter().rev() {
			path.push('/');
			path.push_str(name);
		}
		Some(path)
	}
}
