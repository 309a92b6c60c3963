#![forbid(unsafe_code)]

use thiserror::Error;

use crate::ServerMessage;

/// Default maximum encoded message size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024; // 2 MiB

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("message exceeds maximum size: len={len} max={max}")]
	MessageTooLarge {
		len: usize,
		max: usize,
	},

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Encode a message as a JSON text frame.
pub fn encode_message(msg: &ServerMessage, max_frame_size: usize) -> Result<String, CodecError> {
	let text = serde_json::to_string(msg)?;
	if text.len() > max_frame_size {
		return Err(CodecError::MessageTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}
	Ok(text)
}

/// Encode a message using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_message_default(msg: &ServerMessage) -> Result<String, CodecError> {
	encode_message(msg, DEFAULT_MAX_FRAME_SIZE)
}

/// Decode a JSON text frame.
pub fn decode_message(text: &str, max_frame_size: usize) -> Result<ServerMessage, CodecError> {
	if text.len() > max_frame_size {
		return Err(CodecError::MessageTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}
	Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn oversized_message_is_rejected_on_encode() {
		let msg = ServerMessage::Update {
			channel_path: "/channels/general".to_string(),
			username: "alice".to_string(),
		};

		match encode_message(&msg, 8) {
			Err(CodecError::MessageTooLarge { len, max }) => {
				assert!(len > 8);
				assert_eq!(max, 8);
			}
			other => panic!("expected MessageTooLarge, got: {other:?}"),
		}
	}

	#[test]
	fn garbage_fails_to_decode() {
		assert!(matches!(
			decode_message("{\"type\":\"NOPE\"}", DEFAULT_MAX_FRAME_SIZE),
			Err(CodecError::Json(_))
		));
	}
}
