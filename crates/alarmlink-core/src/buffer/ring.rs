//! Fixed-capacity circular byte FIFO.
//!
//! The ring never allocates: its storage is an inline `[u8; N]` array, so a
//! `ByteRing` can live inside a long-lived link context without touching the
//! heap.  A full ring rejects new bytes instead of overwriting the oldest one;
//! losing the *newest* byte is recoverable (the frame parser notices the gap),
//! whereas silently rewriting the head of a half-parsed frame is not.

use thiserror::Error;

/// Errors returned by [`ByteRing`] operations.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum RingError {
    /// The ring holds `capacity` bytes and cannot accept another.
    #[error("ring buffer full")]
    Full,

    /// A read was attempted on an empty ring.
    #[error("ring buffer empty")]
    Empty,

    /// `peek` was asked for a byte beyond the current occupancy.
    #[error("peek offset {offset} out of range (count {count})")]
    OffsetOutOfRange { offset: usize, count: usize },
}

/// A circular FIFO of at most `N` bytes.
///
/// # Examples
///
/// ```rust
/// use alarmlink_core::buffer::ByteRing;
///
/// let mut ring: ByteRing<4> = ByteRing::new();
/// ring.push(0x02).unwrap();
/// ring.push(0x50).unwrap();
/// assert_eq!(ring.peek(1), Ok(0x50));
/// assert_eq!(ring.pop(), Ok(0x02));
/// assert_eq!(ring.count(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ByteRing<const N: usize> {
    storage: [u8; N],
    /// Index of the oldest byte.
    head: usize,
    /// Number of bytes currently stored.
    count: usize,
}

impl<const N: usize> ByteRing<N> {
    /// Creates an empty ring.
    pub const fn new() -> Self {
        Self {
            storage: [0; N],
            head: 0,
            count: 0,
        }
    }

    /// Appends `byte` at the tail.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Full`] when the ring already holds `N` bytes; the
    /// byte is discarded and the existing contents are left untouched.
    pub fn push(&mut self, byte: u8) -> Result<(), RingError> {
        if self.count == N {
            return Err(RingError::Full);
        }
        let tail = (self.head + self.count) % N;
        self.storage[tail] = byte;
        self.count += 1;
        Ok(())
    }

    /// Removes and returns the oldest byte.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Empty`] if there is nothing to read.
    pub fn pop(&mut self) -> Result<u8, RingError> {
        if self.count == 0 {
            return Err(RingError::Empty);
        }
        let byte = self.storage[self.head];
        self.head = (self.head + 1) % N;
        self.count -= 1;
        Ok(byte)
    }

    /// Returns the byte `offset` positions after the oldest one without
    /// consuming anything.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Empty`] on an empty ring and
    /// [`RingError::OffsetOutOfRange`] when `offset >= count()`.
    pub fn peek(&self, offset: usize) -> Result<u8, RingError> {
        if self.count == 0 {
            return Err(RingError::Empty);
        }
        if offset >= self.count {
            return Err(RingError::OffsetOutOfRange {
                offset,
                count: self.count,
            });
        }
        Ok(self.storage[(self.head + offset) % N])
    }

    /// Drops up to `n` bytes from the front and returns how many were dropped.
    pub fn discard(&mut self, n: usize) -> usize {
        let dropped = n.min(self.count);
        if N > 0 {
            self.head = (self.head + dropped) % N;
        }
        self.count -= dropped;
        dropped
    }

    /// Empties the ring.
    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    /// Number of bytes currently stored.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Maximum number of bytes the ring can hold.
    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == N
    }
}

impl<const N: usize> Default for ByteRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ring_is_empty() {
        let ring: ByteRing<8> = ByteRing::new();
        assert_eq!(ring.count(), 0);
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 8);
    }

    #[test]
    fn test_pop_order_matches_push_order() {
        // Arrange
        let mut ring: ByteRing<8> = ByteRing::new();
        let input = [0x01, 0x20, 0x03, 0xFF, 0x00];

        // Act
        for b in input {
            ring.push(b).unwrap();
        }
        let output: Vec<u8> = (0..input.len()).map(|_| ring.pop().unwrap()).collect();

        // Assert
        assert_eq!(output, input);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_push_beyond_capacity_is_rejected_without_overwrite() {
        // Arrange
        let mut ring: ByteRing<3> = ByteRing::new();
        ring.push(0xA1).unwrap();
        ring.push(0xA2).unwrap();
        ring.push(0xA3).unwrap();

        // Act
        let result = ring.push(0xA4);

        // Assert – rejected, oldest byte still at the head
        assert_eq!(result, Err(RingError::Full));
        assert!(ring.is_full());
        assert_eq!(ring.pop(), Ok(0xA1));
        assert_eq!(ring.pop(), Ok(0xA2));
        assert_eq!(ring.pop(), Ok(0xA3));
    }

    #[test]
    fn test_interleaved_push_pop_wraps_storage() {
        // Arrange – force head and tail to wrap several times
        let mut ring: ByteRing<4> = ByteRing::new();
        let mut expected = std::collections::VecDeque::new();

        // Act
        for i in 0u8..50 {
            ring.push(i).unwrap();
            expected.push_back(i);
            if i % 3 != 0 {
                assert_eq!(ring.pop().ok(), expected.pop_front());
            }
            if ring.is_full() {
                assert_eq!(ring.pop().ok(), expected.pop_front());
            }
        }

        // Assert
        while let Some(b) = expected.pop_front() {
            assert_eq!(ring.pop(), Ok(b));
        }
        assert_eq!(ring.pop(), Err(RingError::Empty));
    }

    #[test]
    fn test_pop_on_empty_ring_fails() {
        let mut ring: ByteRing<4> = ByteRing::new();
        assert_eq!(ring.pop(), Err(RingError::Empty));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut ring: ByteRing<4> = ByteRing::new();
        ring.push(0x10).unwrap();
        ring.push(0x11).unwrap();

        assert_eq!(ring.peek(0), Ok(0x10));
        assert_eq!(ring.peek(1), Ok(0x11));
        assert_eq!(ring.count(), 2);
    }

    #[test]
    fn test_peek_out_of_range_fails() {
        let mut ring: ByteRing<4> = ByteRing::new();
        assert_eq!(ring.peek(0), Err(RingError::Empty));

        ring.push(0x10).unwrap();
        assert_eq!(
            ring.peek(1),
            Err(RingError::OffsetOutOfRange {
                offset: 1,
                count: 1
            })
        );
    }

    #[test]
    fn test_peek_across_wrap_boundary() {
        // Arrange – head sits at index 3 of 4
        let mut ring: ByteRing<4> = ByteRing::new();
        for b in [0, 1, 2] {
            ring.push(b).unwrap();
        }
        ring.discard(3);
        for b in [7, 8, 9] {
            ring.push(b).unwrap();
        }

        // Assert
        assert_eq!(ring.peek(0), Ok(7));
        assert_eq!(ring.peek(2), Ok(9));
    }

    #[test]
    fn test_discard_is_bounded_by_count() {
        let mut ring: ByteRing<4> = ByteRing::new();
        ring.push(1).unwrap();
        ring.push(2).unwrap();

        assert_eq!(ring.discard(5), 2);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_clear_resets_to_empty() {
        let mut ring: ByteRing<4> = ByteRing::new();
        ring.push(1).unwrap();
        ring.push(2).unwrap();

        ring.clear();

        assert_eq!(ring.count(), 0);
        assert_eq!(ring.pop(), Err(RingError::Empty));
        ring.push(3).unwrap();
        assert_eq!(ring.peek(0), Ok(3));
    }
}
