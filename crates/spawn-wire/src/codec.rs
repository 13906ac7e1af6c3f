//! Pack/unpack: the wire codec proper (§4.1).
//!
//! `pack` seeks the cursor past the header, writes the payload, computes
//! `payload_len` from how far the cursor ended up, seeks back to the start and
//! writes the header. `unpack` is the inverse, and fails with `Malformed`
//! whenever a length prefix or message type doesn't check out.

use byteorder::{ByteOrder, LittleEndian};
use spawn_bytes::Buffer;
use spawn_error::{Error, Result};

use crate::header::{MessageHeader, FLAG_BROADCAST, HEADER_SIZE};
use crate::message::{Message, MessageType};
use crate::optpool::OptPool;

/// Addressing and framing parameters supplied by the caller; the payload shape
/// is implied by the `Message` variant.
pub struct Envelope {
    pub src: u16,
    pub dst: u16,
    pub broadcast: bool,
    pub channel: u16,
}

impl Envelope {
    pub fn unicast(src: u16, dst: u16, channel: u16) -> Self {
        Envelope { src, dst, broadcast: false, channel }
    }

    pub fn broadcast(src: u16, channel: u16) -> Self {
        Envelope { src, dst: 0, broadcast: true, channel }
    }
}

/// Packs `message` into a freshly allocated [`Buffer`], framed with a header
/// built from `envelope`.
pub fn pack(envelope: &Envelope, message: &Message) -> Result<Buffer> {
    let mut buf = Buffer::new(HEADER_SIZE.max(spawn_bytes::DEFAULT_CAPACITY));
    buf.resize(HEADER_SIZE)?;
    buf.seek(HEADER_SIZE)?;
    write_payload(&mut buf, message)?;

    let payload_len = (buf.size() - HEADER_SIZE) as u32;
    if payload_len == 0 {
        return Err(Error::Malformed("refusing to pack a zero-length payload".into()));
    }

    let header = MessageHeader {
        src: envelope.src,
        dst: envelope.dst,
        flags: if envelope.broadcast { FLAG_BROADCAST } else { 0 },
        msg_type: message.message_type() as u16,
        channel: envelope.channel,
        payload_len,
    };
    buf.seek(0)?;
    buf.write_bytes(&header.encode())?;
    buf.seek(0)?;
    Ok(buf)
}

/// Decodes just the header from the first [`HEADER_SIZE`] bytes of `buf`,
/// without disturbing its cursor. Used by the bus to inspect a send-queue
/// head (destination, broadcast flag) before deciding whether it can be
/// placed into a send slot yet (§4.4 step 2).
pub fn peek_header(buf: &Buffer) -> Result<MessageHeader> {
    let slice = buf.as_slice();
    MessageHeader::decode(slice)
}

/// Unpacks a complete frame (header + exactly `payload_len` bytes of payload
/// already present in `buf`) into its header and typed message.
pub fn unpack(buf: &mut Buffer) -> Result<(MessageHeader, Message)> {
    buf.seek(0)?;
    let header_bytes = buf.read_bytes(HEADER_SIZE)?;
    let header = MessageHeader::decode(&header_bytes)?;
    let payload = buf.read_bytes(header.payload_len as usize)?;
    let message = read_payload(&header, &payload)?;
    Ok((header, message))
}

// --- payload writing -------------------------------------------------------

fn write_u16(buf: &mut Buffer, v: u16) -> Result<()> {
    let mut bytes = [0u8; 2];
    LittleEndian::write_u16(&mut bytes, v);
    buf.write_bytes(&bytes)
}

fn write_u32(buf: &mut Buffer, v: u32) -> Result<()> {
    let mut bytes = [0u8; 4];
    LittleEndian::write_u32(&mut bytes, v);
    buf.write_bytes(&bytes)
}

fn write_i32(buf: &mut Buffer, v: i32) -> Result<()> {
    write_u32(buf, v as u32)
}

fn write_u64(buf: &mut Buffer, v: u64) -> Result<()> {
    let mut bytes = [0u8; 8];
    LittleEndian::write_u64(&mut bytes, v);
    buf.write_bytes(&bytes)
}

/// Strings are a `u64` length (including the trailing NUL) followed by bytes
/// and the NUL itself (§6).
fn write_string(buf: &mut Buffer, s: &str) -> Result<()> {
    write_u64(buf, s.len() as u64 + 1)?;
    buf.write_bytes(s.as_bytes())?;
    buf.write_bytes(&[0u8])
}

fn write_string_array(buf: &mut Buffer, items: &[String]) -> Result<()> {
    write_u32(buf, items.len() as u32)?;
    for item in items {
        write_string(buf, item)?;
    }
    Ok(())
}

fn write_i32_array(buf: &mut Buffer, items: &[i32]) -> Result<()> {
    write_u32(buf, items.len() as u32)?;
    for &item in items {
        write_i32(buf, item)?;
    }
    Ok(())
}

fn write_optpool(buf: &mut Buffer, opts: &OptPool) -> Result<()> {
    write_string_array(buf, &opts.to_wire_strings())
}

fn write_payload(buf: &mut Buffer, message: &Message) -> Result<()> {
    match message {
        Message::RequestJoin { pid, ip, port } => {
            write_u32(buf, *pid)?;
            write_u32(buf, *ip)?;
            write_u32(buf, *port)
        }
        Message::ResponseJoin { addr, opts } => {
            write_u32(buf, *addr)?;
            write_optpool(buf, opts)
        }
        Message::Ping { now } => write_u64(buf, *now),
        Message::RequestExec { host, argv } => {
            write_string(buf, host)?;
            write_string_array(buf, argv)
        }
        Message::RequestBuildTree { hosts } => write_i32_array(buf, hosts),
        Message::ResponseBuildTree { deads } => write_u32(buf, *deads),
        Message::RequestTask { path, argv, channel } => {
            write_string(buf, path)?;
            write_string_array(buf, argv)?;
            write_u32(buf, *channel)
        }
        Message::ResponseTask { ret } => write_u32(buf, *ret),
        Message::RequestExit { signum } => write_u32(buf, *signum),
        Message::ResponseExit => Ok(()),
    }
}

// --- payload reading --------------------------------------------------------

/// A bounds-checked cursor over an in-memory payload slice.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::Malformed(format!(
                "payload cursor at {} needs {} more bytes, only {} remain",
                self.pos,
                n,
                self.bytes.len() - self.pos
            )));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u64()? as usize;
        if len == 0 {
            return Err(Error::Malformed("string length of zero excludes the NUL terminator".into()));
        }
        let bytes = self.take(len)?;
        let (content, nul) = bytes.split_at(len - 1);
        if nul != [0u8] {
            return Err(Error::Malformed("string is missing its trailing NUL".into()));
        }
        String::from_utf8(content.to_vec()).map_err(|e| Error::Malformed(e.to_string()))
    }

    fn string_array(&mut self) -> Result<Vec<String>> {
        let count = self.u32()? as usize;
        (0..count).map(|_| self.string()).collect()
    }

    fn i32_array(&mut self) -> Result<Vec<i32>> {
        let count = self.u32()? as usize;
        (0..count).map(|_| self.i32()).collect()
    }

    fn optpool(&mut self) -> Result<OptPool> {
        Ok(OptPool::from_wire_strings(self.string_array()?))
    }

    fn finish(self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(Error::Malformed(format!(
                "payload had {} trailing bytes after decode",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn read_payload(header: &MessageHeader, payload: &[u8]) -> Result<Message> {
    let msg_type = MessageType::from_u16(header.msg_type)
        .ok_or_else(|| Error::Malformed(format!("unknown message type {}", header.msg_type)))?;
    let mut r = Reader::new(payload);
    let message = match msg_type {
        MessageType::RequestJoin => Message::RequestJoin {
            pid: r.u32()?,
            ip: r.u32()?,
            port: r.u32()?,
        },
        MessageType::ResponseJoin => Message::ResponseJoin { addr: r.u32()?, opts: r.optpool()? },
        MessageType::Ping => Message::Ping { now: r.u64()? },
        MessageType::RequestExec => Message::RequestExec { host: r.string()?, argv: r.string_array()? },
        MessageType::RequestBuildTree => Message::RequestBuildTree { hosts: r.i32_array()? },
        MessageType::ResponseBuildTree => Message::ResponseBuildTree { deads: r.u32()? },
        MessageType::RequestTask => {
            let path = r.string()?;
            let argv = r.string_array()?;
            let channel = r.u32()?;
            Message::RequestTask { path, argv, channel }
        }
        MessageType::ResponseTask => Message::ResponseTask { ret: r.u32()? },
        MessageType::RequestExit => Message::RequestExit { signum: r.u32()? },
        MessageType::ResponseExit => Message::ResponseExit,
    };
    r.finish()?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) {
        let envelope = Envelope::unicast(3, 7, 42);
        let mut buf = pack(&envelope, &message).unwrap();
        let (header, decoded) = unpack(&mut buf).unwrap();
        assert_eq!(header.src, 3);
        assert_eq!(header.dst, 7);
        assert_eq!(header.channel, 42);
        assert!(!header.is_broadcast());
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trips_every_message_type() {
        roundtrip(Message::RequestJoin { pid: 123, ip: 0x7f000001, port: 9000 });
        let mut opts = OptPool::new();
        opts.set("Hosts", "a[01-02]");
        roundtrip(Message::ResponseJoin { addr: 77, opts });
        roundtrip(Message::Ping { now: 1_690_000_000 });
        roundtrip(Message::RequestExec {
            host: "a01".into(),
            argv: vec!["spawn".into(), "10.0.0.1".into()],
        });
        roundtrip(Message::RequestBuildTree { hosts: vec![0, 1, 2, -1] });
        roundtrip(Message::ResponseBuildTree { deads: 0 });
        roundtrip(Message::RequestTask {
            path: "/usr/lib/task.so".into(),
            argv: vec!["--verbose".into()],
            channel: 5,
        });
        roundtrip(Message::ResponseTask { ret: 0 });
        roundtrip(Message::RequestExit { signum: 15 });
        roundtrip(Message::ResponseExit);
    }

    #[test]
    fn broadcast_flag_round_trips() {
        let envelope = Envelope::broadcast(0, 1);
        let mut buf = pack(&envelope, &Message::Ping { now: 1 }).unwrap();
        let (header, _) = unpack(&mut buf).unwrap();
        assert!(header.is_broadcast());
    }

    #[test]
    fn zero_payload_len_is_rejected() {
        let mut buf = Buffer::new(HEADER_SIZE);
        buf.resize(HEADER_SIZE).unwrap();
        // All-zero header: payload_len field is zero.
        buf.seek(0).unwrap();
        let result = unpack(&mut buf);
        assert!(result.is_err());
    }

    #[test]
    fn truncated_string_length_is_malformed() {
        let envelope = Envelope::unicast(0, 1, 0);
        let mut buf = pack(&envelope, &Message::RequestExec { host: "a01".into(), argv: vec![] }).unwrap();
        // Corrupt payload_len to claim more bytes than actually follow.
        let mut header_bytes = buf.read_bytes(HEADER_SIZE).unwrap();
        LittleEndian::write_u32(&mut header_bytes[12..16], 255);
        let mut corrupted = Buffer::new(HEADER_SIZE);
        corrupted.write_bytes(&header_bytes).unwrap();
        corrupted.seek(0).unwrap();
        assert!(unpack(&mut corrupted).is_err());
    }
}
