//! Wire types for the filedepot protocol.
//!
//! All client/server communication runs over a single WebSocket connection:
//! control messages travel as JSON text frames wrapped in a [`Message`]
//! envelope, file data travels as binary frames with a small JSON header
//! (see [`frame`]).

pub mod constants;
pub mod envelope;
pub mod frame;
pub mod messages;

pub use constants::MessageType;
pub use envelope::{DecodeError, Message, WsError};
pub use frame::{ChunkHeader, FrameError, encode_chunk_frame, parse_chunk_frame};
