//! # IoBuffer - Growable Head/Tail Byte Buffer
//!
//! Backing store of the buffered byte source. Live bytes sit contiguously
//! between a `head` ("first used") and a `tail` ("next available") cursor in a
//! single array. There is no wraparound: when the free space after `tail` is
//! too small, live bytes are shifted down to index 0, and only when that is
//! still not enough is the array reallocated.
//!
//! Keeping the window contiguous lets a caller peek at a whole response as
//! one slice, which is what non-consuming reads need.
//!
//! ## Usage
//!
//! ```rust
//! use meterlink::util::IoBuffer;
//!
//! let mut buffer = IoBuffer::new();
//! buffer.write(&[0x01, 0x02, 0x03]).unwrap();
//!
//! assert_eq!(buffer.peek(2), &[0x01, 0x02]);
//! let data = buffer.consume(2);
//! assert_eq!(data, vec![0x01, 0x02]);
//! ```

use crate::constants::{STREAM_INITIAL_CAPACITY, STREAM_MAX_CAPACITY};
use thiserror::Error;

/// Errors that can occur during IoBuffer operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IoBufferError {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Capacity limit exceeded: {limit}")]
    CapacityExceeded { limit: usize },
}

/// Growable byte buffer with explicit head/tail cursors.
#[derive(Debug, Clone)]
pub struct IoBuffer {
    data: Vec<u8>,
    head: usize,
    tail: usize,
    max_capacity: usize,
    bytes_written: u64,
    bytes_consumed: u64,
    compactions: u64,
    reallocations: u64,
}

impl IoBuffer {
    /// Create a new IoBuffer with the default initial and maximum capacity
    pub fn new() -> Self {
        Self::with_capacity(STREAM_INITIAL_CAPACITY, STREAM_MAX_CAPACITY)
    }

    /// Create a new IoBuffer with explicit initial and maximum capacity
    pub fn with_capacity(initial: usize, max_capacity: usize) -> Self {
        let max_capacity = max_capacity.max(1);
        let initial = initial.clamp(1, max_capacity);
        Self {
            data: vec![0; initial],
            head: 0,
            tail: 0,
            max_capacity,
            bytes_written: 0,
            bytes_consumed: 0,
            compactions: 0,
            reallocations: 0,
        }
    }

    /// Number of live bytes
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Currently allocated storage size
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Free space after `tail` that can be filled without shifting
    pub fn free_tail(&self) -> usize {
        self.data.len() - self.tail
    }

    /// All live bytes as one contiguous slice
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.head..self.tail]
    }

    /// Up to `count` bytes from the front without consuming them
    pub fn peek(&self, count: usize) -> &[u8] {
        let end = self.head + count.min(self.len());
        &self.data[self.head..end]
    }

    /// Bytes in `[start, start + count)` relative to the front, clipped to what is live
    pub fn peek_range(&self, start: usize, count: usize) -> &[u8] {
        if start >= self.len() {
            return &[];
        }
        let begin = self.head + start;
        let end = (begin + count).min(self.tail);
        &self.data[begin..end]
    }

    /// Byte at `index` relative to the front
    pub fn get(&self, index: usize) -> Option<u8> {
        if index < self.len() {
            Some(self.data[self.head + index])
        } else {
            None
        }
    }

    /// Check if buffer starts with the given pattern
    pub fn starts_with(&self, pattern: &[u8]) -> bool {
        self.as_slice().starts_with(pattern)
    }

    /// Consume and return up to `count` bytes from the front of the buffer
    pub fn consume(&mut self, count: usize) -> Vec<u8> {
        let out = self.peek(count).to_vec();
        self.discard(out.len());
        out
    }

    /// Drop up to `count` bytes from the front, returning how many were dropped
    pub fn discard(&mut self, count: usize) -> usize {
        let n = count.min(self.len());
        self.head += n;
        self.bytes_consumed += n as u64;
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
        n
    }

    /// Append data at the tail, shifting or growing as needed
    pub fn write(&mut self, data: &[u8]) -> Result<usize, IoBufferError> {
        let slot = self.spare_mut(data.len())?;
        slot[..data.len()].copy_from_slice(data);
        self.commit(data.len())?;
        Ok(data.len())
    }

    /// Make at least `additional` bytes available after `tail`.
    ///
    /// Compacts first; reallocates only when compaction alone cannot make room.
    pub fn reserve(&mut self, additional: usize) -> Result<(), IoBufferError> {
        if self.free_tail() >= additional {
            return Ok(());
        }

        let needed = self.len() + additional;
        if needed > self.max_capacity {
            return Err(IoBufferError::CapacityExceeded {
                limit: self.max_capacity,
            });
        }

        if self.head > 0 {
            self.compact();
            if self.free_tail() >= additional {
                return Ok(());
            }
        }

        let new_capacity = needed.max(self.data.len() * 2).min(self.max_capacity);
        self.data.resize(new_capacity, 0);
        self.reallocations += 1;
        Ok(())
    }

    /// Writable slot of exactly `additional` bytes after `tail`.
    ///
    /// Bytes written into the slot only become live after [`IoBuffer::commit`].
    pub fn spare_mut(&mut self, additional: usize) -> Result<&mut [u8], IoBufferError> {
        self.reserve(additional)?;
        let tail = self.tail;
        Ok(&mut self.data[tail..tail + additional])
    }

    /// Mark `count` bytes of the spare slot as live
    pub fn commit(&mut self, count: usize) -> Result<(), IoBufferError> {
        if count > self.free_tail() {
            return Err(IoBufferError::InvalidOperation(format!(
                "commit of {count} bytes with only {} free",
                self.free_tail()
            )));
        }
        self.tail += count;
        self.bytes_written += count as u64;
        Ok(())
    }

    /// Shift live bytes down to index 0
    pub fn compact(&mut self) {
        if self.head == 0 {
            return;
        }
        self.data.copy_within(self.head..self.tail, 0);
        self.tail -= self.head;
        self.head = 0;
        self.compactions += 1;
    }

    /// Clear all data from the buffer
    pub fn clear(&mut self) {
        self.bytes_consumed += self.len() as u64;
        self.head = 0;
        self.tail = 0;
    }

    /// Get buffer statistics
    pub fn stats(&self) -> IoBufferStats {
        IoBufferStats {
            current_len: self.len(),
            capacity: self.data.len(),
            bytes_written: self.bytes_written,
            bytes_consumed: self.bytes_consumed,
            compactions: self.compactions,
            reallocations: self.reallocations,
        }
    }
}

impl Default for IoBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about an IoBuffer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoBufferStats {
    /// Current number of bytes in buffer
    pub current_len: usize,
    /// Current allocated capacity
    pub capacity: usize,
    /// Total bytes written since creation
    pub bytes_written: u64,
    /// Total bytes consumed since creation
    pub bytes_consumed: u64,
    /// Number of left shifts performed
    pub compactions: u64,
    /// Number of storage reallocations
    pub reallocations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let mut buffer = IoBuffer::new();

        assert_eq!(buffer.write(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.is_empty());

        let data = buffer.consume(2);
        assert_eq!(data, vec![1, 2]);
        assert_eq!(buffer.len(), 1);

        let remaining = buffer.consume(10);
        assert_eq!(remaining, vec![3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_peek_operations() {
        let mut buffer = IoBuffer::new();
        buffer.write(&[1, 2, 3, 4, 5]).unwrap();

        assert_eq!(buffer.peek(3), &[1, 2, 3]);
        assert_eq!(buffer.len(), 5);

        assert_eq!(buffer.peek_range(1, 3), &[2, 3, 4]);
        assert_eq!(buffer.peek_range(3, 10), &[4, 5]);
        assert!(buffer.peek_range(10, 5).is_empty());
        assert_eq!(buffer.get(4), Some(5));
        assert_eq!(buffer.get(5), None);
    }

    #[test]
    fn test_cursors_reset_when_drained() {
        let mut buffer = IoBuffer::with_capacity(8, 8);
        buffer.write(&[1, 2, 3, 4]).unwrap();
        buffer.discard(4);
        assert_eq!(buffer.free_tail(), 8);
    }

    #[test]
    fn test_compaction_before_growth() {
        let mut buffer = IoBuffer::with_capacity(8, 64);
        buffer.write(&[1, 2, 3, 4, 5, 6]).unwrap();
        buffer.discard(4);

        // 2 live bytes at the end, 2 free: needs a shift for 5 more
        buffer.write(&[7, 8, 9, 10, 11]).unwrap();
        assert_eq!(buffer.as_slice(), &[5, 6, 7, 8, 9, 10, 11]);

        let stats = buffer.stats();
        assert_eq!(stats.compactions, 1);
        assert_eq!(stats.reallocations, 0);
        assert_eq!(stats.capacity, 8);
    }

    #[test]
    fn test_growth_when_compaction_insufficient() {
        let mut buffer = IoBuffer::with_capacity(4, 64);
        buffer.write(&[1, 2, 3]).unwrap();
        buffer.write(&[4, 5, 6, 7, 8]).unwrap();

        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buffer.stats().reallocations, 1);
        assert!(buffer.capacity() >= 8);
    }

    #[test]
    fn test_capacity_limit() {
        let mut buffer = IoBuffer::with_capacity(4, 6);
        assert!(buffer.write(&[1, 2, 3, 4]).is_ok());
        assert_eq!(
            buffer.write(&[5, 6, 7]),
            Err(IoBufferError::CapacityExceeded { limit: 6 })
        );
        // Failed write leaves contents untouched
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_commit_overflow_is_rejected() {
        let mut buffer = IoBuffer::with_capacity(4, 4);
        assert!(matches!(
            buffer.commit(5),
            Err(IoBufferError::InvalidOperation(_))
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_spare_and_commit_partial() {
        let mut buffer = IoBuffer::with_capacity(4, 32);
        let slot = buffer.spare_mut(10).unwrap();
        slot[0] = 0xAA;
        slot[1] = 0xBB;
        buffer.commit(2).unwrap();
        assert_eq!(buffer.as_slice(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_statistics() {
        let mut buffer = IoBuffer::new();
        buffer.write(&[1, 2, 3, 4, 5]).unwrap();
        buffer.consume(2);

        let stats = buffer.stats();
        assert_eq!(stats.current_len, 3);
        assert_eq!(stats.bytes_written, 5);
        assert_eq!(stats.bytes_consumed, 2);
        assert!(buffer.starts_with(&[3, 4]));
    }
}
