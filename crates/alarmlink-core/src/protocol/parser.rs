//! Incremental frame parser with one-byte-at-a-time resynchronisation.
//!
//! # How the parser recovers from garbage (for beginners)
//!
//! The serial line can drop or corrupt any byte, so the start of the receive
//! buffer is not guaranteed to be the start of a frame.  Each call to
//! [`FrameParser::poll`] looks at the front of the buffer and either:
//!
//! - waits, because not enough bytes have arrived yet;
//! - accepts one complete, whitelisted, checksum-correct frame; or
//! - throws away exactly **one** byte and tries again on the next call.
//!
//! Dropping one byte per call bounds the work done per call and lets the
//! caller interleave other duties, while repeated calls walk forward through
//! the garbage until a real header lines up at the front.
//!
//! Two pieces of state make this well behaved:
//!
//! - the **integrity timer** bounds how long a partial frame may sit in the
//!   buffer.  It starts when the first byte of a frame is seen, restarts on
//!   every byte arrival, and when it expires the buffer is flushed;
//! - the **failure latch** remembers that a NAK was already requested for the
//!   current burst of garbage, so a burst costs at most one NAK.  It also
//!   remembers *why* it was set: only an integrity failure following another
//!   integrity failure is fatal.  A corrupt frame whose leftovers later time
//!   out is ordinary noise.

use tracing::{debug, trace, warn};

use super::checksum::verify;
use super::frame::{
    frame_len, Whitelist, COMMAND_OFFSET, LENGTH_OFFSET, MAGIC_OFFSET, MIN_FRAME_LEN,
};
use crate::buffer::ReceiveBuffer;
use crate::slots::{MessageSlotStore, SlotId};
use crate::timer::{Millis, SoftwareTimer};

/// How long a partial frame may wait for its next byte.
pub const DEFAULT_INTEGRITY_TIMEOUT_MS: Millis = 100;

/// How long an accepted inbound frame stays valid before it is considered
/// stale and may be expired.
pub const DEFAULT_ACK_WINDOW_MS: Millis = 1000;

/// Result of one [`FrameParser::poll`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A frame has started but is not complete, or nothing is pending.
    TooFewBytes,
    /// Garbage was discarded without requesting another NAK.
    ByteDropped,
    /// The front of the buffer is corrupt and a NAK should be sent.
    RequestNak,
    /// The integrity window elapsed a second time while recovering.
    Timeout,
    /// A complete frame is waiting but the destination pool is full.
    NoFreeSlot,
    /// A verified frame was copied into this slot and validated.
    Frame(SlotId),
}

/// What set the failure latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// A header or checksum did not verify.
    Corruption,
    /// The integrity window expired or the receive buffer overflowed.
    Integrity,
}

/// Turns the receive byte stream into verified frames.
#[derive(Debug, Clone)]
pub struct FrameParser {
    whitelist: Whitelist,
    integrity: SoftwareTimer,
    failure: Option<FailureCause>,
    integrity_timeout: Millis,
    ack_window: Millis,
}

impl FrameParser {
    /// Creates a parser that accepts headers admitted by `whitelist`.
    pub fn new(whitelist: Whitelist, integrity_timeout: Millis, ack_window: Millis) -> Self {
        Self {
            whitelist,
            integrity: SoftwareTimer::new(),
            failure: None,
            integrity_timeout,
            ack_window,
        }
    }

    /// Byte-arrival hook: a running integrity window is extended.
    pub fn on_byte_arrival(&mut self, now: Millis) {
        if self.integrity.is_active() {
            self.integrity.restart(now);
        }
    }

    /// Forgets the failure latch and stops the integrity timer.
    pub fn reset(&mut self) {
        self.integrity.stop();
        self.failure = None;
    }

    pub fn is_recovering(&self) -> bool {
        self.failure.is_some()
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        self.failure
    }

    pub fn is_collecting(&self) -> bool {
        self.integrity.is_active()
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Drops the front byte and reports the burst's first failure as a NAK
    /// request, later ones as plain drops.
    fn fail_one_byte(&mut self, rx: &mut ReceiveBuffer) -> ParseOutcome {
        rx.discard(1);
        if !self.may_hold_frame_start(rx) {
            rx.clear();
            self.integrity.stop();
        }
        if self.failure.is_some() {
            trace!(pending = rx.count(), "dropped one byte while resynchronising");
            ParseOutcome::ByteDropped
        } else {
            self.failure = Some(FailureCause::Corruption);
            debug!(pending = rx.count(), "corrupt frame start; requesting NAK");
            ParseOutcome::RequestNak
        }
    }

    /// `false` once the buffer is too short to be checked as a header and
    /// none of its bytes is the expected magic, so no frame can start there.
    fn may_hold_frame_start(&self, rx: &ReceiveBuffer) -> bool {
        let pending = rx.count();
        pending >= MIN_FRAME_LEN
            || (0..pending).any(|offset| rx.peek(offset) == Ok(self.whitelist.magic()))
    }

    /// Runs one parsing step against `rx`, placing an accepted frame in `store`.
    pub fn poll(
        &mut self,
        now: Millis,
        rx: &mut ReceiveBuffer,
        store: &mut MessageSlotStore,
    ) -> ParseOutcome {
        if rx.has_overflowed() {
            rx.clear();
            self.integrity.stop();
            if self.failure.take().is_some() {
                warn!("receive overflow while recovering");
                return ParseOutcome::Timeout;
            }
            self.failure = Some(FailureCause::Integrity);
            warn!("receive overflow; requesting NAK");
            return ParseOutcome::RequestNak;
        }

        if !self.integrity.is_active() {
            if rx.is_empty() {
                return ParseOutcome::TooFewBytes;
            }
            self.integrity.start(now, self.integrity_timeout);
        }

        if self.integrity.is_timed_out(now) {
            let flushed = rx.count();
            rx.clear();
            self.integrity.stop();
            return match self.failure.take() {
                Some(FailureCause::Integrity) => {
                    warn!(flushed, "integrity window expired while recovering");
                    ParseOutcome::Timeout
                }
                Some(FailureCause::Corruption) => {
                    // The corrupt frame was already NAKed; its tail is noise.
                    debug!(flushed, "leftovers of a corrupt frame timed out");
                    ParseOutcome::ByteDropped
                }
                None => {
                    self.failure = Some(FailureCause::Integrity);
                    debug!(flushed, "integrity window expired; requesting NAK");
                    ParseOutcome::RequestNak
                }
            };
        }

        if rx.count() < MIN_FRAME_LEN {
            return ParseOutcome::TooFewBytes;
        }

        // count() >= MIN_FRAME_LEN so the header peeks cannot fail.
        let (Ok(magic), Ok(command), Ok(declared)) = (
            rx.peek(MAGIC_OFFSET),
            rx.peek(COMMAND_OFFSET),
            rx.peek(LENGTH_OFFSET),
        ) else {
            return ParseOutcome::TooFewBytes;
        };
        let declared = declared as usize;

        if !self.whitelist.accepts(magic, command, declared) {
            return self.fail_one_byte(rx);
        }

        let total = frame_len(declared);
        if rx.count() < total {
            return ParseOutcome::TooFewBytes;
        }

        let Some(slot) = store.free_slot() else {
            warn!(command, "no free slot for inbound frame");
            return ParseOutcome::NoFreeSlot;
        };

        if !self.copy_frame(rx, store, slot, total) || !store.bytes(slot).is_ok_and(verify) {
            if store.clear_slot(slot).is_err() {
                warn!(%slot, "could not release the slot of a rejected frame");
            }
            return self.fail_one_byte(rx);
        }

        self.failure = None;
        self.integrity.stop();
        rx.discard(total);
        if store.validate(slot, now, self.ack_window).is_err() {
            return ParseOutcome::NoFreeSlot;
        }
        trace!(command, len = declared, %slot, "frame accepted");
        ParseOutcome::Frame(slot)
    }

    /// Copies the first `total` buffered bytes into `slot` without consuming them.
    fn copy_frame(
        &self,
        rx: &ReceiveBuffer,
        store: &mut MessageSlotStore,
        slot: SlotId,
        total: usize,
    ) -> bool {
        if store.clear_slot(slot).is_err() {
            return false;
        }
        (0..total).all(|offset| {
            rx.peek(offset)
                .is_ok_and(|byte| store.append_byte(slot, byte).is_ok())
        })
    }
}
