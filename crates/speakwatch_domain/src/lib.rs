#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parent id the upstream uses for top-level channels.
pub const ROOT_CHANNEL_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Display name used for senders that cannot be resolved to a user.
pub const WEBHOOK_USERNAME: &str = "webhook";

/// Prefix of every resolved channel path.
pub const CHANNEL_PATH_PREFIX: &str = "/channels";

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! opaque_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			/// Create a non-empty id.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				if id.trim().is_empty() {
					return Err(ParseIdError::Empty);
				}
				if id.contains('/') {
					return Err(ParseIdError::InvalidFormat(id));
				}
				Ok(Self(id))
			}
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				$name::new(s.to_string())
			}
		}
	};
}

opaque_id!(
	/// Upstream channel identifier.
	ChannelId
);

opaque_id!(
	/// Upstream user identifier.
	UserId
);

opaque_id!(
	/// Upstream message identifier.
	EventId
);

impl ChannelId {
	/// Whether this id terminates a parent chain (empty or the root sentinel).
	pub fn is_root(&self) -> bool {
		let id = self.0.trim();
		id.is_empty() || id == ROOT_CHANNEL_ID
	}
}

/// A channel as listed by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntity {
	pub id: ChannelId,
	pub name: String,
	#[serde(default)]
	pub parent_id: Option<ChannelId>,
}

impl ChannelEntity {
	pub fn new(id: ChannelId, name: impl Into<String>, parent_id: Option<ChannelId>) -> Self {
		Self {
			id,
			name: name.into(),
			parent_id,
		}
	}

	/// Parent to continue a path walk with, `None` at the top of the tree.
	pub fn parent(&self) -> Option<&ChannelId> {
		self.parent_id.as_ref().filter(|p| !p.is_root())
	}
}

/// A user as listed by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntity {
	pub id: UserId,
	pub name: String,
}

impl UserEntity {
	pub fn new(id: UserId, name: impl Into<String>) -> Self {
		Self { id, name: name.into() }
	}
}

/// One message from the activity timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
	pub id: EventId,
	pub user_id: UserId,
	pub channel_id: ChannelId,
	#[serde(default)]
	pub content: String,
	pub created_at: DateTime<Utc>,
}

/// Latest speaker for a channel path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedChange {
	pub channel_path: String,
	pub username: String,
}

impl ResolvedChange {
	pub fn new(channel_path: impl Into<String>, username: impl Into<String>) -> Self {
		Self {
			channel_path: channel_path.into(),
			username: username.into(),
		}
	}
}

impl fmt::Display for ResolvedChange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} -> @{}", self.channel_path, self.username)
	}
}
