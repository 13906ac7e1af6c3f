//! Per-port send/receive slots (§4.4 steps 2, 6, 7).

use std::sync::Arc;

use spawn_bytes::BufferHandle;

/// A port's outgoing slot: empty, or mid-write through a shared, already
/// framed byte buffer. Broadcast fan-out assigns the *same* `Arc<Vec<u8>>* to
/// every child slot (§4.4 step 2, §8 invariant 5); unicast assigns a
/// single-owner one. Bytes are copied out of the pooled [`spawn_bytes::Buffer`]
/// at fill time and the handle is returned to the pool immediately -- see
/// DESIGN.md for why this crate resolves the source's "in-flight send buffer"
/// differently than the receive path.
pub enum SendSlot {
    Empty,
    Sending { bytes: Arc<Vec<u8>>, written: usize },
}

impl SendSlot {
    pub fn is_empty(&self) -> bool {
        matches!(self, SendSlot::Empty)
    }
}

/// A port's incoming slot: `None` until the first byte of a new frame arrives.
pub type RecvSlot = Option<BufferHandle>;
