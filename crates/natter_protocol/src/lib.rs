#![forbid(unsafe_code)]

pub mod events;
pub mod framing;

pub use events::{
	ClientEvent, ErrorPayload, MessagePayload, PresenceChange, Receipt, ReceiptAck, SendMessage, ServerEvent, TypingStatus,
	TypingUpdate,
};
pub use framing::{DEFAULT_MAX_FRAME_SIZE, FrameError, decode_frame, encode_frame, encode_frame_default};

/// Protocol version constants.
pub mod version {
	/// Current protocol major version.
	pub const PROTOCOL_MAJOR: u32 = 1;
	/// Current protocol minor version.
	pub const PROTOCOL_MINOR: u32 = 0;
}
