//! The join handshake (C9, §4.9): runs exactly once on a freshly spawned
//! agent, synchronously, before the message bus or job engine exist.

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};

use spawn_bytes::Buffer;
use spawn_error::{Error, Result};
use spawn_net::Network;
use spawn_wire::{Envelope, Message, OptPool, HEADER_SIZE};

use crate::channels::CONTROL_CHANNEL;

/// Connects to the parent, performs the synchronous `REQUEST_JOIN` /
/// `RESPONSE_JOIN` exchange, and installs the resulting connection as port 0
/// with the LFT fully pointed at it (every id routes through the parent
/// until this node's own children join). Returns the option pool carried
/// back by the parent.
pub fn run(parent_ip: Ipv4Addr, parent_port: u16, here: u16, size: u16, network: &Network) -> Result<OptPool> {
    let addr = SocketAddr::new(IpAddr::V4(parent_ip), parent_port);
    let mut stream = TcpStream::connect(addr).map_err(|e| Error::io(format!("connecting to parent at {addr}"), e))?;
    let local = stream.local_addr().map_err(|e| Error::io("reading local socket address", e))?;

    let local_ip_bits = match local.ip() {
        IpAddr::V4(v4) => u32::from(v4),
        IpAddr::V6(_) => return Err(Error::Invalid("join handshake requires an IPv4 local address".into())),
    };

    let request = Message::RequestJoin { pid: std::process::id(), ip: local_ip_bits, port: local.port() as u32 };
    let envelope = Envelope::unicast(here, 0, CONTROL_CHANNEL);
    let framed = spawn_wire::pack(&envelope, &request)?;
    stream.write_all(framed.as_slice()).map_err(|e| Error::io("writing REQUEST_JOIN", e))?;

    let mut header_bytes = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_bytes).map_err(|e| Error::io("reading RESPONSE_JOIN header", e))?;
    let mut header_buf = Buffer::new(HEADER_SIZE);
    header_buf.write_bytes(&header_bytes)?;
    let header = spawn_wire::peek_header(&header_buf)?;

    let mut payload_bytes = vec![0u8; header.payload_len as usize];
    stream.read_exact(&mut payload_bytes).map_err(|e| Error::io("reading RESPONSE_JOIN payload", e))?;

    let mut full = Buffer::new(HEADER_SIZE + payload_bytes.len());
    full.write_bytes(&header_bytes)?;
    full.write_bytes(&payload_bytes)?;
    full.seek(0)?;
    let (_decoded_header, message) = spawn_wire::unpack(&mut full)?;

    let opts = match message {
        Message::ResponseJoin { opts, .. } => opts,
        other => return Err(Error::Malformed(format!("expected RESPONSE_JOIN, got {:?}", other.message_type()))),
    };

    stream.set_nonblocking(true).map_err(|e| Error::io("setting parent socket non-blocking", e))?;
    let mio_stream = spawn_net::TcpStream::from_std(stream);

    let mut state = network.lock();
    state.resize_lft(size as usize);
    let port = state.add_port(mio_stream);
    state.initialize_lft(port);

    Ok(opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdTcpListener;

    /// Drives a one-shot server side of the handshake: accepts a single
    /// connection, reads its `REQUEST_JOIN`, and replies with
    /// `RESPONSE_JOIN` carrying `opts`.
    fn serve_one_handshake(listener: StdTcpListener, opts: OptPool) {
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut header_bytes = [0u8; HEADER_SIZE];
            stream.read_exact(&mut header_bytes).expect("read request header");
            let mut header_buf = Buffer::new(HEADER_SIZE);
            header_buf.write_bytes(&header_bytes).unwrap();
            let header = spawn_wire::peek_header(&header_buf).unwrap();
            let mut payload = vec![0u8; header.payload_len as usize];
            stream.read_exact(&mut payload).expect("read request payload");

            let envelope = Envelope::unicast(0, header.src, CONTROL_CHANNEL);
            let response = Message::ResponseJoin { addr: 0x7f00_0001, opts };
            let framed = spawn_wire::pack(&envelope, &response).unwrap();
            stream.write_all(framed.as_slice()).expect("write response");
        });
    }

    #[test]
    fn run_completes_the_handshake_and_installs_port_zero() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let parent_port = listener.local_addr().unwrap().port();

        let mut opts = OptPool::new();
        opts.set("TreeWidth", "2");
        serve_one_handshake(listener, opts.clone());

        let network = Network::new(1);
        let result = run(Ipv4Addr::LOCALHOST, parent_port, 1, 3, &network).unwrap();

        assert_eq!(result.get("TreeWidth"), Some("2"));
        let state = network.lock();
        assert_eq!(state.nports(), 1);
        assert_eq!(state.lft_lookup(0), Some(0), "every id initially routes via the parent");
        assert_eq!(state.lft_lookup(2), Some(0));
    }
}
