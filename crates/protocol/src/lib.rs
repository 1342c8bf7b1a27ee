//! Parley Wire Protocol
//!
//! Typed events exchanged with a remote conversational agent and the JSON codec
//! that maps them to and from bytes. This crate has no runtime dependencies and
//! can be shared by clients, agent-side test doubles, and tooling.

pub mod codec;
pub mod events;

pub use codec::{CodecError, decode, decode_outgoing, encode, encode_incoming};
pub use events::{IncomingEvent, OutgoingEvent};
