//! Consecutive-NAK counter with a "too many" guard.
//!
//! Every corrupted burst on the receive side asks for one NAK.  If the peer
//! keeps producing garbage, flooding a dead link with NAKs only makes things
//! worse, so after [`DEFAULT_NAK_LIMIT`] consecutive requests the guard stops
//! emitting and flips to the "too many" state, which the engine reports as a
//! critical error.

use tracing::{debug, warn};

use super::frame::{control_frame, Command, MIN_FRAME_LEN};
use crate::transport::Transport;

/// Number of consecutive NAK requests that trips the guard.
pub const DEFAULT_NAK_LIMIT: u8 = 3;

/// Result of a [`NakEscalation::request_nak`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakStatus {
    /// A NAK frame was handed to the transport.
    Sent,
    /// The limit is reached; nothing was sent.
    TooMany,
}

/// Tracks consecutive NAK requests for one link.
#[derive(Debug, Clone)]
pub struct NakEscalation {
    frame: [u8; MIN_FRAME_LEN],
    limit: u8,
    count: u8,
    too_many: bool,
}

impl NakEscalation {
    /// Creates a guard that stamps its NAK frames with `magic`.
    pub fn new(magic: u8, limit: u8) -> Self {
        Self {
            frame: control_frame(magic, Command::Nak),
            limit,
            count: 0,
            too_many: false,
        }
    }

    /// Counts one NAK request and, while under the limit, transmits a NAK.
    pub fn request_nak<T: Transport + ?Sized>(&mut self, transport: &mut T) -> NakStatus {
        self.count = self.count.saturating_add(1);
        if self.count >= self.limit {
            if !self.too_many {
                warn!(count = self.count, "NAK limit reached; suppressing further NAKs");
            }
            self.too_many = true;
            return NakStatus::TooMany;
        }

        let sent = transport.transmit(&self.frame);
        if sent != self.frame.len() {
            warn!(sent, "short write while sending NAK");
        }
        debug!(count = self.count, "NAK sent");
        NakStatus::Sent
    }

    /// Forgets the consecutive-request history.  Leaves the "too many" flag alone.
    pub fn reset_counter(&mut self) {
        self.count = 0;
    }

    /// Clears the "too many" flag.  Leaves the counter alone.
    pub fn reset_state(&mut self) {
        self.too_many = false;
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    pub fn is_too_many(&self) -> bool {
        self.too_many
    }

    pub fn limit(&self) -> u8 {
        self.limit
    }
}
