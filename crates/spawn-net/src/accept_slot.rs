//! The single-slot accept handoff between the bus thread and the foreground
//! (§4.4 step 5). A burst of simultaneous connects can lose all but one -- the
//! source's known limitation, noted rather than fixed (§9).

use mio::net::TcpStream;
use parking_lot::Mutex;
use spawn_error::{fault, Result};

#[derive(Default)]
pub struct AcceptSlot {
    slot: Mutex<Option<TcpStream>>,
}

impl AcceptSlot {
    pub fn new() -> Self {
        AcceptSlot { slot: Mutex::new(None) }
    }

    /// Publishes a freshly accepted connection. Fails if the slot is already
    /// occupied -- a second accept before the first was handed off is a
    /// protocol violation, per the compare-and-swap-from-empty discipline.
    pub fn publish(&self, stream: TcpStream) -> Result<()> {
        let mut guard = self.slot.lock();
        if guard.is_some() {
            return Err(fault!(
                "accept handoff slot already occupied; a connect burst overran the single-slot handoff"
            ));
        }
        *guard = Some(stream);
        Ok(())
    }

    /// Takes the pending connection, if any.
    pub fn take(&self) -> Option<TcpStream> {
        self.slot.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}
