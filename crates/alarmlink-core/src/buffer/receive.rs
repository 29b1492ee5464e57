//! Serial receive buffer with a sticky overflow latch.

use tracing::warn;

use super::ring::{ByteRing, RingError};

/// Capacity of the receive ring: one maximal frame plus the start of the next.
pub const RX_BUFFER_CAPACITY: usize = 64;

/// Bytes received from the peer, waiting for the frame parser.
///
/// The overflow latch is set the first time a byte is rejected and stays set
/// until [`clear`](Self::clear) or [`clear_overflow`](Self::clear_overflow) is
/// called.  The parser uses it to tell "wait for more bytes" apart from "the
/// link is flooding us".
#[derive(Debug, Clone, Default)]
pub struct ReceiveBuffer {
    ring: ByteRing<RX_BUFFER_CAPACITY>,
    overflowed: bool,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores one received byte, latching the overflow flag if there is no room.
    pub fn push(&mut self, byte: u8) -> Result<(), RingError> {
        let result = self.ring.push(byte);
        if result.is_err() && !self.overflowed {
            warn!("receive buffer overflow; dropping 0x{byte:02X}");
            self.overflowed = true;
        }
        result
    }

    pub fn pop(&mut self) -> Result<u8, RingError> {
        self.ring.pop()
    }

    pub fn peek(&self, offset: usize) -> Result<u8, RingError> {
        self.ring.peek(offset)
    }

    /// Drops up to `n` bytes from the front.
    pub fn discard(&mut self, n: usize) -> usize {
        self.ring.discard(n)
    }

    pub fn count(&self) -> usize {
        self.ring.count()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Clears the overflow latch without touching the stored bytes.
    pub fn clear_overflow(&mut self) {
        self.overflowed = false;
    }

    /// Empties the buffer and clears the overflow latch.
    pub fn clear(&mut self) {
        self.ring.clear();
        self.overflowed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(buffer: &mut ReceiveBuffer) {
        for i in 0..RX_BUFFER_CAPACITY {
            buffer.push(i as u8).unwrap();
        }
    }

    #[test]
    fn test_fresh_buffer_has_not_overflowed() {
        let buffer = ReceiveBuffer::new();
        assert!(!buffer.has_overflowed());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_rejected_push_sets_overflow_latch() {
        // Arrange
        let mut buffer = ReceiveBuffer::new();
        fill(&mut buffer);

        // Act
        let result = buffer.push(0xEE);

        // Assert
        assert_eq!(result, Err(RingError::Full));
        assert!(buffer.has_overflowed());
    }

    #[test]
    fn test_overflow_latch_survives_draining() {
        // Arrange
        let mut buffer = ReceiveBuffer::new();
        fill(&mut buffer);
        let _ = buffer.push(0xEE);

        // Act – consuming bytes must not clear the latch
        while buffer.pop().is_ok() {}

        // Assert
        assert!(buffer.is_empty());
        assert!(buffer.has_overflowed());
    }

    #[test]
    fn test_clear_resets_bytes_and_latch() {
        let mut buffer = ReceiveBuffer::new();
        fill(&mut buffer);
        let _ = buffer.push(0xEE);

        buffer.clear();

        assert!(buffer.is_empty());
        assert!(!buffer.has_overflowed());
    }

    #[test]
    fn test_clear_overflow_keeps_bytes() {
        let mut buffer = ReceiveBuffer::new();
        fill(&mut buffer);
        let _ = buffer.push(0xEE);

        buffer.clear_overflow();

        assert!(!buffer.has_overflowed());
        assert_eq!(buffer.count(), RX_BUFFER_CAPACITY);
        assert_eq!(buffer.peek(0), Ok(0));
    }
}
