#![forbid(unsafe_code)]

pub mod codec;

pub use codec::{CodecError, DEFAULT_MAX_FRAME_SIZE, decode_message, encode_message, encode_message_default};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use speakwatch_domain::ResolvedChange;

/// Server → subscriber message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
	/// Full `channelPath -> username` state, sent once per connection.
	#[serde(rename = "INIT")]
	Init { state: BTreeMap<String, String> },

	/// One channel changed speaker.
	#[serde(rename = "UPDATE")]
	Update {
		#[serde(rename = "channelPath")]
		channel_path: String,
		username: String,
	},
}

impl ServerMessage {
	pub fn init<I>(state: I) -> Self
	where
		I: IntoIterator<Item = (String, String)>,
	{
		Self::Init {
			state: state.into_iter().collect(),
		}
	}

	pub fn update(change: &ResolvedChange) -> Self {
		Self::Update {
			channel_path: change.channel_path.clone(),
			username: change.username.clone(),
		}
	}

	/// Stable wire name of the message type.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Init { .. } => "INIT",
			Self::Update { .. } => "UPDATE",
		}
	}
}

impl From<&ResolvedChange> for ServerMessage {
	fn from(change: &ResolvedChange) -> Self {
		Self::update(change)
	}
}
