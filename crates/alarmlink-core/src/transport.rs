//! Capabilities the link engine needs from its surroundings.
//!
//! The engine never talks to a UART directly.  Everything that leaves the
//! protocol core goes through [`Transport`], and the only other side effect,
//! blinking an activity LED or similar, goes through [`ActivityIndicator`].
//! Both are injected at construction so the engine stays fully unit-testable.

/// Byte-level serial transport towards the peer.
///
/// Received bytes do not flow through this trait; the platform's byte-arrival
/// notification calls
/// [`ProtocolEngine::on_byte_received`](crate::engine::ProtocolEngine::on_byte_received)
/// instead.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Queues `frame` for transmission and returns how many bytes were accepted.
    fn transmit(&mut self, frame: &[u8]) -> usize;

    /// Re-enables the byte-arrival notification.
    fn start_reception(&mut self) {}

    /// Disables the byte-arrival notification.
    fn stop_reception(&mut self) {}
}

/// Signals that the link did something observable (a frame went out or came in).
pub trait ActivityIndicator {
    fn signal_activity(&mut self);
}

/// An [`ActivityIndicator`] that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActivity;

impl ActivityIndicator for NoActivity {
    fn signal_activity(&mut self) {}
}

/// A [`Transport`] that queues outgoing bytes for a host-side harness.
///
/// Simulators and tests collect the queued bytes with
/// [`take_bytes`](Self::take_bytes) and hand them to the peer's
/// byte-arrival notification, optionally through a lossy channel.
#[derive(Debug, Clone)]
pub struct BufferedTransport {
    outgoing: Vec<u8>,
    frames_sent: usize,
    write_limit: Option<usize>,
    receiving: bool,
}

impl BufferedTransport {
    pub fn new() -> Self {
        Self {
            outgoing: Vec::new(),
            frames_sent: 0,
            write_limit: None,
            receiving: true,
        }
    }

    /// A transport that accepts at most `limit` bytes per call, emulating a
    /// driver whose TX FIFO is too small for the frame.
    pub fn with_write_limit(limit: usize) -> Self {
        Self {
            write_limit: Some(limit),
            ..Self::new()
        }
    }

    /// Removes and returns every byte queued so far.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing)
    }

    /// Bytes queued and not yet taken.
    pub fn pending(&self) -> &[u8] {
        &self.outgoing
    }

    /// Number of `transmit` calls that accepted the whole frame.
    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    /// Whether the engine currently wants byte-arrival notifications.
    pub fn is_receiving(&self) -> bool {
        self.receiving
    }
}

impl Default for BufferedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for BufferedTransport {
    fn transmit(&mut self, frame: &[u8]) -> usize {
        let accepted = self.write_limit.map_or(frame.len(), |l| l.min(frame.len()));
        self.outgoing.extend_from_slice(&frame[..accepted]);
        if accepted == frame.len() {
            self.frames_sent += 1;
        }
        accepted
    }

    fn start_reception(&mut self) {
        self.receiving = true;
    }

    fn stop_reception(&mut self) {
        self.receiving = false;
    }
}
