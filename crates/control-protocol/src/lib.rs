//! Control channel protocol for the classroom engine.
//!
//! Control messages carry signaling that has no native media representation
//! (hand raise, chat, screen-share announcements, moderation). They ride the
//! transport's data channel as small JSON objects discriminated by `type`.
//!
//! Delivery is best-effort and ordered per sender only. Nothing here retries
//! or persists; a lost message is corrected by the next state change.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod envelope;
pub mod message;

pub use codec::{decode_message, encode_message, CodecError};
pub use envelope::InboundPacket;
pub use message::{ControlMessage, MessageKind};
