//! The message bus (C4): a background poll-driven I/O thread plus the send
//! and receive queues the foreground exchanges frames through (§4.4).

mod bus;
mod queue;
mod slots;

pub use bus::{Comm, DEFAULT_POLL_TIMEOUT};
pub use queue::{RecvQueue, SendQueue};
pub use slots::{RecvSlot, SendSlot};
