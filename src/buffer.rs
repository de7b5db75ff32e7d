//! Double-indexed elastic byte buffer.
//!
//! [`ByteBuf`] keeps two monotone indexes over one contiguous allocation:
//!
//! ```text
//! +--------------+--------------------+------------------+
//! |  read bytes  |   readable bytes   |  writable bytes  |
//! |              |  (unread content)  |      (free)      |
//! +--------------+--------------------+------------------+
//! 0      <=   read_index    <=    write_index   <=   capacity
//! ```
//!
//! Indexes only move forward, except through [`ByteBuf::reset`] (both back
//! to zero) and [`ByteBuf::release`] (compaction: the consumed prefix is
//! dropped and the readable region moves to the front).
//!
//! The buffer is not parallel-safe; the pipeline confines each instance to
//! its reader worker.

/// Elastic byte buffer with separate read and write indexes.
#[derive(Debug)]
pub struct ByteBuf {
    buffer: Vec<u8>,
    read_index: usize,
    write_index: usize,
}

impl ByteBuf {
    /// Create a buffer with the given initial capacity.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            buffer: vec![0; initial_capacity],
            read_index: 0,
            write_index: 0,
        }
    }

    /// Append bytes at the write index, growing the allocation if the free
    /// region is too small.
    ///
    /// Growth policy: the new capacity is `ceil((len + write_index) * 1.2)`.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let write_size = bytes.len();
        if write_size == 0 {
            return;
        }

        if self.writable_bytes() < write_size {
            let new_capacity = ((write_size + self.write_index) as f64 * 1.2).ceil() as usize;
            self.buffer.resize(new_capacity, 0);
        }

        self.buffer[self.write_index..self.write_index + write_size].copy_from_slice(bytes);
        self.write_index += write_size;
    }

    /// Read up to `length` bytes starting at the read index, advancing it by
    /// the number of bytes actually returned.
    ///
    /// Returns fewer than `length` bytes when the readable region is
    /// shorter; `length == 0` returns an empty vector without advancing.
    pub fn read_bytes(&mut self, length: usize) -> Vec<u8> {
        let read_size = length.min(self.readable_bytes());
        let result = self.buffer[self.read_index..self.read_index + read_size].to_vec();
        self.read_index += read_size;
        result
    }

    /// Number of unread bytes (`write_index - read_index`).
    pub fn readable_bytes(&self) -> usize {
        self.write_index - self.read_index
    }

    /// Number of free bytes (`capacity - write_index`).
    pub fn writable_bytes(&self) -> usize {
        self.buffer.len() - self.write_index
    }

    /// Current allocation size.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Current read index.
    pub fn read_index(&self) -> usize {
        self.read_index
    }

    /// Current write index.
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Reset both indexes to zero. Content is undefined afterwards but the
    /// allocation is kept.
    pub fn reset(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
    }

    /// Drop the consumed prefix and move the readable region to the front.
    ///
    /// Afterwards `read_index == 0`, `write_index` equals the old readable
    /// count, and the capacity shrinks by the number of consumed bytes. The
    /// readable region is preserved bit for bit.
    pub fn release(&mut self) {
        let mut compacted = vec![0; self.buffer.len() - self.read_index];
        compacted[..self.readable_bytes()]
            .copy_from_slice(&self.buffer[self.read_index..self.write_index]);
        self.buffer = compacted;
        self.write_index -= self.read_index;
        self.read_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_preserves_order() {
        let mut buf = ByteBuf::new(16);
        buf.write_bytes(b"hello");
        buf.write_bytes(b" world");

        assert_eq!(buf.read_bytes(11), b"hello world");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn test_read_more_than_readable() {
        let mut buf = ByteBuf::new(16);
        buf.write_bytes(b"abc");

        let out = buf.read_bytes(10);
        assert_eq!(out, b"abc");
        assert_eq!(buf.read_index(), 3);
    }

    #[test]
    fn test_read_zero_does_not_advance() {
        let mut buf = ByteBuf::new(16);
        buf.write_bytes(b"abc");

        assert!(buf.read_bytes(0).is_empty());
        assert_eq!(buf.read_index(), 0);
        assert_eq!(buf.readable_bytes(), 3);
    }

    #[test]
    fn test_growth_on_overflow() {
        let mut buf = ByteBuf::new(4);
        buf.write_bytes(b"0123456789");

        assert_eq!(buf.write_index(), 10);
        // ceil(10 * 1.2) = 12
        assert_eq!(buf.capacity(), 12);
        assert_eq!(buf.read_bytes(10), b"0123456789");
    }

    #[test]
    fn test_growth_accounts_for_existing_content() {
        let mut buf = ByteBuf::new(4);
        buf.write_bytes(b"abcd");
        buf.write_bytes(b"efgh");

        // ceil((4 + 4) * 1.2) = 10
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.read_bytes(8), b"abcdefgh");
    }

    #[test]
    fn test_write_empty_is_noop() {
        let mut buf = ByteBuf::new(4);
        buf.write_bytes(b"");
        assert_eq!(buf.write_index(), 0);
        assert_eq!(buf.capacity(), 4);
    }

    #[test]
    fn test_reset() {
        let mut buf = ByteBuf::new(16);
        buf.write_bytes(b"abcdef");
        buf.read_bytes(3);

        buf.reset();

        assert_eq!(buf.read_index(), 0);
        assert_eq!(buf.write_index(), 0);
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn test_release_compacts_and_preserves_readable() {
        let mut buf = ByteBuf::new(16);
        buf.write_bytes(b"abcdefgh");
        buf.read_bytes(3);

        buf.release();

        assert_eq!(buf.read_index(), 0);
        assert_eq!(buf.write_index(), 5);
        assert_eq!(buf.capacity(), 13);
        assert_eq!(buf.read_bytes(5), b"defgh");
    }

    #[test]
    fn test_release_with_nothing_consumed() {
        let mut buf = ByteBuf::new(8);
        buf.write_bytes(b"xy");

        buf.release();

        assert_eq!(buf.read_index(), 0);
        assert_eq!(buf.write_index(), 2);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.read_bytes(2), b"xy");
    }

    #[test]
    fn test_interleaved_write_read_release() {
        let mut buf = ByteBuf::new(4);
        let mut collected = Vec::new();

        for chunk in [&b"one"[..], b"two", b"three", b"four"] {
            buf.write_bytes(chunk);
            collected.extend(buf.read_bytes(2));
            buf.release();
        }
        collected.extend(buf.read_bytes(buf.readable_bytes()));

        assert_eq!(collected, b"onetwothreefour");
    }
}
