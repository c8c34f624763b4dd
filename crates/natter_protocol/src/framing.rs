#![forbid(unsafe_code)]

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Default maximum text frame size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024; // 256 KiB

#[derive(Debug, Error)]
pub enum FrameError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Encode an event into a JSON text frame.
pub fn encode_frame<M: Serialize>(msg: &M, max_frame_size: usize) -> Result<String, FrameError> {
	let text = serde_json::to_string(msg)?;
	if text.len() > max_frame_size {
		return Err(FrameError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}
	Ok(text)
}

/// Encode a frame using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_frame_default<M: Serialize>(msg: &M) -> Result<String, FrameError> {
	encode_frame(msg, DEFAULT_MAX_FRAME_SIZE)
}

/// Decode a JSON text frame. The size check runs before any parsing.
pub fn decode_frame<M: DeserializeOwned>(text: &str, max_frame_size: usize) -> Result<M, FrameError> {
	if text.len() > max_frame_size {
		return Err(FrameError::FrameTooLarge {
			len: text.len(),
			max: max_frame_size,
		});
	}

	Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::{ClientEvent, ServerEvent};

	#[test]
	fn decode_rejects_oversized_before_parsing() {
		let text = "x".repeat(64);
		let err = decode_frame::<ClientEvent>(&text, 16).unwrap_err();
		match err {
			FrameError::FrameTooLarge { len, max } => {
				assert_eq!(len, 64);
				assert_eq!(max, 16);
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn encode_rejects_too_large() {
		let ev = ServerEvent::error("X", "y".repeat(1000));
		let err = encode_frame(&ev, 32).unwrap_err();
		assert!(matches!(err, FrameError::FrameTooLarge { .. }));
	}

	#[test]
	fn decode_reports_json_errors() {
		let err = decode_frame::<ClientEvent>("{not json", DEFAULT_MAX_FRAME_SIZE).unwrap_err();
		assert!(matches!(err, FrameError::Json(_)));
	}

	#[test]
	fn unknown_event_name_is_rejected() {
		let err = decode_frame::<ClientEvent>(r#"{"event":"joinRoom","data":{}}"#, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
		assert!(matches!(err, FrameError::Json(_)));
	}
}
