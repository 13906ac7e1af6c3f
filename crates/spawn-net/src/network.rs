//! Per-node routing state: participant id, LFT, ports and listening endpoints
//! (C3, §4.3). All mutation happens through the single [`Network`] lock; the
//! message bus (C4) reads the same lock to decide where to poll and send.

use mio::net::{TcpListener, TcpStream};
use parking_lot::{Mutex, MutexGuard};

use crate::accept_slot::AcceptSlot;
use crate::lft::Lft;

/// Backlog default for `TreeSockBacklog` (§6) lives with the listener, not
/// here; this struct only tracks already-bound listeners.
pub struct NetworkState {
    pub here: u16,
    pub size: u16,
    pub lft: Lft,
    /// Ports in connection order; port 0 is conventionally "up toward root"
    /// on every non-root node (§3).
    pub ports: Vec<TcpStream>,
    pub listeners: Vec<TcpListener>,
}

impl NetworkState {
    pub fn resize_lft(&mut self, size: usize) {
        self.lft.resize(size);
        self.size = size as u16;
    }

    /// Appends a new port without touching the LFT (§4.3).
    pub fn add_port(&mut self, stream: TcpStream) -> usize {
        self.ports.push(stream);
        self.ports.len() - 1
    }

    pub fn add_listener(&mut self, listener: TcpListener) -> usize {
        self.listeners.push(listener);
        self.listeners.len() - 1
    }

    pub fn initialize_lft(&mut self, port: usize) {
        self.lft.initialize(port);
    }

    pub fn modify_lft(&mut self, port: usize, ids: &[u16]) {
        self.lft.modify(port, ids);
    }

    pub fn lft_lookup(&self, id: u16) -> Option<usize> {
        self.lft.lookup(id)
    }

    pub fn nports(&self) -> usize {
        self.ports.len()
    }

    /// Finds the port whose peer socket address matches `(ip, port)`, the
    /// `(local ip, local port)` a connecting child reports about itself in
    /// its `REQUEST_JOIN` (§4.8: "match src's (ip, port) against known
    /// connected ports via `getpeername` comparison").
    pub fn find_port_by_peer(&self, ip: u32, port: u16) -> Option<usize> {
        let target_ip = std::net::Ipv4Addr::from(ip);
        self.ports.iter().position(|stream| match stream.peer_addr() {
            Ok(addr) => match addr.ip() {
                std::net::IpAddr::V4(v4) => v4 == target_ip && addr.port() == port,
                std::net::IpAddr::V6(_) => false,
            },
            Err(_) => false,
        })
    }

    /// Validates the invariant from §8 property 3: every id other than our own
    /// resolves to a valid port index (or is legitimately still unknown while
    /// the tree is being built).
    pub fn lft_entries_are_in_range(&self) -> bool {
        (0..self.lft.len()).all(|id| match self.lft.lookup(id as u16) {
            Some(port) => port < self.ports.len(),
            None => true,
        })
    }
}

/// Owns the per-node network state behind a single lock, plus the
/// single-slot accept handoff the bus publishes freshly accepted connections
/// through (§4.4 step 5, §5).
pub struct Network {
    state: Mutex<NetworkState>,
    accept: AcceptSlot,
}

impl Network {
    pub fn new(here: u16) -> Self {
        Network {
            state: Mutex::new(NetworkState {
                here,
                size: 0,
                lft: Lft::default(),
                ports: Vec::new(),
                listeners: Vec::new(),
            }),
            accept: AcceptSlot::new(),
        }
    }

    /// Acquires the single network lock covering the LFT, ports, and listening
    /// endpoints (§5).
    pub fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock()
    }

    pub fn accept_slot(&self) -> &AcceptSlot {
        &self.accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn loopback_listener() -> TcpListener {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        TcpListener::bind(addr).unwrap()
    }

    #[test]
    fn two_host_tree_routes_by_single_parent_port() {
        // H1's view: everything routes through port 0 (the parent).
        let net = Network::new(1);
        {
            let mut state = net.lock();
            state.resize_lft(2);
            state.initialize_lft(0);
        }
        let state = net.lock();
        assert_eq!(state.lft_lookup(0), Some(0));
        assert_eq!(state.lft_lookup(1), Some(0));
    }

    #[test]
    fn five_host_k2_tree_splits_subtrees_across_child_ports() {
        // Root's view: ids {1,2} via port 0, ids {3,4} via port 1.
        let net = Network::new(0);
        {
            let mut state = net.lock();
            state.resize_lft(5);
            state.modify_lft(0, &[1, 2]);
            state.modify_lft(1, &[3, 4]);
        }
        let state = net.lock();
        assert_eq!(state.lft_lookup(1), Some(0));
        assert_eq!(state.lft_lookup(2), Some(0));
        assert_eq!(state.lft_lookup(3), Some(1));
        assert_eq!(state.lft_lookup(4), Some(1));
        assert!(state.lft_entries_are_in_range());
    }

    #[test]
    fn accept_slot_rejects_a_second_publish_before_take() {
        let net = Network::new(0);
        let listener = loopback_listener();
        let addr = listener.local_addr().unwrap();
        let first = TcpStream::connect(addr).unwrap();
        let second = TcpStream::connect(addr).unwrap();

        net.accept_slot().publish(first).unwrap();
        assert!(net.accept_slot().is_pending());
        assert!(net.accept_slot().publish(second).is_err());
        assert!(net.accept_slot().take().is_some());
        assert!(!net.accept_slot().is_pending());
    }
}
