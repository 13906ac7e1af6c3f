//! Per-node routing table (C3): the Linear Forwarding Table, the port and
//! listener inventory it routes over, and the single network lock that
//! guards all three.

mod accept_slot;
mod lft;
mod network;

pub use accept_slot::AcceptSlot;
pub use lft::{Lft, LftEntry};
pub use network::{Network, NetworkState};

pub use mio::net::{TcpListener, TcpStream};
