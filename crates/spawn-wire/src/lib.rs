//! The length-prefixed little-endian wire protocol (C1): frame header, typed
//! message payloads, and the option pool.

mod codec;
mod header;
mod message;
mod optpool;

pub use codec::{pack, peek_header, unpack, Envelope};
pub use header::{MessageHeader, FLAG_BROADCAST, HEADER_SIZE};
pub use message::{Message, MessageType};
pub use optpool::OptPool;
