//! The fixed frame header (§3, §4.1).

use byteorder::{ByteOrder, LittleEndian};
use spawn_error::{Error, Result};

/// Size in bytes of the on-wire header: six `u16` fields plus a `u32`.
pub const HEADER_SIZE: usize = 2 * 6 + 4;

/// Bit 0 of `flags`: this frame is a broadcast, to be replicated out every
/// child port and consumed locally.
pub const FLAG_BROADCAST: u16 = 0b1;

/// `MessageHeader` precedes every payload on the wire (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub src: u16,
    pub dst: u16,
    pub flags: u16,
    pub msg_type: u16,
    pub channel: u16,
    pub payload_len: u32,
}

impl MessageHeader {
    pub fn is_broadcast(&self) -> bool {
        self.flags & FLAG_BROADCAST != 0
    }

    pub(crate) fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        LittleEndian::write_u16(&mut bytes[0..2], self.src);
        LittleEndian::write_u16(&mut bytes[2..4], self.dst);
        LittleEndian::write_u16(&mut bytes[4..6], self.flags);
        LittleEndian::write_u16(&mut bytes[6..8], self.msg_type);
        LittleEndian::write_u16(&mut bytes[8..10], self.channel);
        LittleEndian::write_u16(&mut bytes[10..12], 0); // _pad
        LittleEndian::write_u32(&mut bytes[12..16], self.payload_len);
        bytes
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Malformed(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        let header = MessageHeader {
            src: LittleEndian::read_u16(&bytes[0..2]),
            dst: LittleEndian::read_u16(&bytes[2..4]),
            flags: LittleEndian::read_u16(&bytes[4..6]),
            msg_type: LittleEndian::read_u16(&bytes[6..8]),
            channel: LittleEndian::read_u16(&bytes[8..10]),
            payload_len: LittleEndian::read_u32(&bytes[12..16]),
        };
        if header.payload_len == 0 {
            return Err(Error::Malformed("payload_len is zero".into()));
        }
        Ok(header)
    }
}
