//! A growable byte buffer with an explicit logical size and read/write cursor.
//!
//! Mirrors the source's `struct buffer`: `capacity`, `size` (logical length) and
//! `pos` (cursor) are tracked explicitly rather than relying on `Vec::len`, since
//! the wire codec distinguishes "bytes physically allocated", "bytes meaningfully
//! written" and "bytes consumed so far" as three separate quantities (§3, §8
//! invariant 2: `0 <= pos <= size <= capacity`).

use spawn_error::{Error, Result};

/// Default initial capacity for a freshly allocated buffer (§4.2).
pub const DEFAULT_CAPACITY: usize = 1024;

pub struct Buffer {
    data: Vec<u8>,
    size: usize,
    pos: usize,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Buffer { data: vec![0u8; capacity], size: 0, pos: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_full(&self) -> bool {
        self.pos == self.size
    }

    /// Grows physical storage, by doubling, until it holds at least `min_capacity`.
    fn grow_to(&mut self, min_capacity: usize) {
        let mut cap = self.data.len().max(1);
        while cap < min_capacity {
            cap *= 2;
        }
        if cap > self.data.len() {
            self.data.resize(cap, 0);
        }
    }

    /// Sets the logical size. Never shrinks below the current cursor position.
    /// Grows physical storage (by doubling) if the new size exceeds capacity.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size < self.pos {
            return Err(Error::Fault(format!(
                "resize({}) would shrink below cursor position {}",
                new_size, self.pos
            )));
        }
        self.grow_to(new_size);
        self.size = new_size;
        Ok(())
    }

    /// Moves the cursor to an arbitrary position within `[0, size]`.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.size {
            return Err(Error::Fault(format!(
                "seek({}) past logical size {}",
                pos, self.size
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// Resets the buffer to empty, keeping its physical storage for reuse.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.size = 0;
    }

    /// Appends `bytes` at the cursor, growing capacity by doubling as needed,
    /// advancing the cursor, and extending the logical size if this write runs
    /// past it.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos + bytes.len();
        self.grow_to(end);
        self.data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        if self.pos > self.size {
            self.size = self.pos;
        }
        Ok(())
    }

    /// Reads `n` bytes at the cursor, advancing it. Fails if that would run past
    /// the logical size -- the codec's `Malformed` condition.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.pos + n > self.size {
            return Err(Error::Malformed(format!(
                "read({}) at pos {} runs past size {}",
                n, self.pos, self.size
            )));
        }
        let out = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// The mutable window between the cursor and the logical size, for a reader
    /// (e.g. a socket) to fill directly without going through [`write_bytes`].
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.pos..self.size]
    }

    /// Advances the cursor by `n` bytes already filled in via [`unfilled_mut`].
    pub fn advance(&mut self, n: usize) -> Result<()> {
        if self.pos + n > self.size {
            return Err(Error::Fault(format!(
                "advance({}) at pos {} runs past size {}",
                n, self.pos, self.size
            )));
        }
        self.pos += n;
        Ok(())
    }

    /// The full logical slice, `[0, size)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_invariant_holds_across_writes_and_reads() {
        let mut buf = Buffer::new(4);
        buf.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert!(buf.capacity() >= 8);
        assert_eq!(buf.size(), 8);
        assert_eq!(buf.pos(), 8);

        buf.seek(0).unwrap();
        assert_eq!(buf.pos(), 0);
        let first_four = buf.read_bytes(4).unwrap();
        assert_eq!(first_four, vec![1, 2, 3, 4]);
        assert_eq!(buf.pos(), 4);
    }

    #[test]
    fn grows_exactly_by_doubling() {
        let mut buf = Buffer::new(4);
        buf.resize(5).unwrap();
        assert_eq!(buf.capacity(), 8);
        buf.resize(8).unwrap();
        assert_eq!(buf.capacity(), 8);
        buf.resize(9).unwrap();
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn resize_below_cursor_is_rejected() {
        let mut buf = Buffer::new(16);
        buf.write_bytes(&[0u8; 10]).unwrap();
        assert!(buf.resize(4).is_err());
    }

    #[test]
    fn read_past_size_is_malformed() {
        let mut buf = Buffer::new(16);
        buf.write_bytes(&[1, 2, 3]).unwrap();
        buf.seek(0).unwrap();
        assert!(buf.read_bytes(10).is_err());
    }
}
