//! The protocol engine: bounded-retry, at-least-once delivery over one serial link.
//!
//! # How a message travels (for beginners)
//!
//! ```text
//!  sender                                   receiver
//!  ──────                                   ────────
//!  transmit_message ──── frame ───────────▶ parse_incoming → NewMessage
//!    (slot kept, deadline armed)              (frame ACKed immediately)
//!  parse_incoming ◀───── ACK ──────────────
//!    (oldest outbound slot freed)
//! ```
//!
//! If the ACK never arrives, [`ProtocolEngine::handle_timeouts`] sends the
//! frame again when its deadline passes, up to `max_transmissions` times in
//! total.  If the receiver sees garbage it answers with a NAK, which makes the
//! sender re-send its oldest unacknowledged frame straight away.
//!
//! ACKs carry no sequence number: an ACK always confirms the *oldest*
//! outstanding frame.  Callers that need strict at-least-once delivery should
//! therefore keep at most one message in flight (stop-and-wait).
//!
//! Anything the engine cannot recover from on its own comes back as a
//! [`CriticalError`].  The only correct reaction is
//! [`ProtocolEngine::reset_everything`].

pub mod config;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::ReceiveBuffer;
use crate::protocol::frame::{
    control_frame, encode_frame, frame_payload, Command, FrameError, Role, COMMAND_OFFSET,
    MIN_FRAME_LEN,
};
use crate::protocol::nak::{NakEscalation, NakStatus};
use crate::protocol::parser::{FrameParser, ParseOutcome};
use crate::slots::{MessageSlotStore, SlotError, SlotId};
use crate::timer::Millis;
use crate::transport::{ActivityIndicator, NoActivity, Transport};

pub use config::{LinkConfig, LinkConfigError};

// ── Outcomes and errors ───────────────────────────────────────────────────────

/// Conditions the engine will not retry on its own.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CriticalError {
    #[error("too many consecutive NAK requests")]
    TooManyNaks,

    /// The oldest outbound message reached its transmission limit.
    #[error("command 0x{command:02X} was not acknowledged after all retries")]
    RetriesExhausted { command: u8 },

    /// The integrity window expired again while recovering from corruption.
    #[error("receive integrity timeout while recovering")]
    IntegrityTimeout,

    /// The inbound pool is full; received messages are not being consumed.
    #[error("no free slot for an inbound frame")]
    NoFreeSlot,
}

/// Result of one [`ProtocolEngine::parse_incoming`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Nothing the caller needs to act on.
    Nothing,
    /// Corruption was seen and a NAK went out.
    NakSent,
    /// A new message is waiting in this inbound slot.
    NewMessage(SlotId),
    /// Call [`ProtocolEngine::reset_everything`].
    Critical(CriticalError),
}

/// Reasons [`ProtocolEngine::transmit_message`] refused to send.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum TransmitError {
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    #[error("no free outbound slot")]
    NoFreeSlot,

    #[error("transport accepted {sent} of {expected} bytes")]
    ShortWrite { sent: usize, expected: usize },

    #[error("slot error: {0}")]
    Slot(#[from] SlotError),
}

/// A received message as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedMessage<'a> {
    pub command: Command,
    pub data: &'a [u8],
}

/// Running counters for one end of the link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// New messages handed to the transport.
    pub frames_sent: u64,
    pub retransmissions: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub naks_sent: u64,
    pub naks_received: u64,
    /// Non-control frames accepted from the peer.
    pub messages_received: u64,
    /// Outbound messages confirmed by an ACK.
    pub deliveries: u64,
    pub critical_errors: u64,
    pub resets: u64,
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// One end of the serial link.
///
/// The engine owns all protocol state.  The caller drives it by:
///
/// - forwarding each received byte to [`on_byte_received`](Self::on_byte_received);
/// - calling [`parse_incoming`](Self::parse_incoming) at least every
///   [`LinkConfig::max_poll_interval_ms`];
/// - calling [`handle_timeouts`](Self::handle_timeouts) regularly;
/// - consuming received messages and deleting them with
///   [`delete_received`](Self::delete_received).
pub struct ProtocolEngine<T: Transport, A: ActivityIndicator = NoActivity> {
    config: LinkConfig,
    role: Role,
    transport: T,
    activity: A,
    rx: ReceiveBuffer,
    parser: FrameParser,
    nak: NakEscalation,
    inbound: MessageSlotStore,
    outbound: MessageSlotStore,
    ack_frame: [u8; MIN_FRAME_LEN],
    stats: LinkStats,
}

impl<T: Transport> ProtocolEngine<T, NoActivity> {
    /// Creates an engine for `role` and enables reception on `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkConfigError`] if `config` fails validation.
    pub fn new(config: LinkConfig, role: Role, transport: T) -> Result<Self, LinkConfigError> {
        Self::with_activity(config, role, transport, NoActivity)
    }
}

impl<T: Transport, A: ActivityIndicator> ProtocolEngine<T, A> {
    /// Like [`new`](ProtocolEngine::new) with an activity indicator that is
    /// signalled for every frame sent or accepted.
    pub fn with_activity(
        config: LinkConfig,
        role: Role,
        mut transport: T,
        activity: A,
    ) -> Result<Self, LinkConfigError> {
        config.validate()?;

        let parser = FrameParser::new(
            role.inbound_whitelist(),
            config.integrity_timeout_ms,
            config.ack_window_ms,
        );
        let nak = NakEscalation::new(role.local_magic(), config.nak_limit);
        let inbound = MessageSlotStore::new(config.pool_slots, config.slot_capacity);
        let outbound = MessageSlotStore::new(config.pool_slots, config.slot_capacity);

        transport.start_reception();
        debug!(?role, ?config, "protocol engine ready");

        Ok(Self {
            ack_frame: control_frame(role.local_magic(), Command::Ack),
            config,
            role,
            transport,
            activity,
            rx: ReceiveBuffer::new(),
            parser,
            nak,
            inbound,
            outbound,
            stats: LinkStats::default(),
        })
    }

    // ── Receive path ──────────────────────────────────────────────────────

    /// Byte-arrival notification.
    ///
    /// Extending the integrity window and storing the byte happen under the
    /// same `&mut self` borrow, so the parser never sees one without the other.
    pub fn on_byte_received(&mut self, now: Millis, byte: u8) {
        self.parser.on_byte_arrival(now);
        // A rejected byte latches the overflow flag; the parser handles it.
        let _ = self.rx.push(byte);
    }

    pub fn on_bytes_received(&mut self, now: Millis, bytes: &[u8]) {
        for &byte in bytes {
            self.on_byte_received(now, byte);
        }
    }

    /// Runs one parser step and reacts to what it found.
    pub fn parse_incoming(&mut self, now: Millis) -> EngineOutcome {
        match self.parser.poll(now, &mut self.rx, &mut self.inbound) {
            ParseOutcome::TooFewBytes | ParseOutcome::ByteDropped => EngineOutcome::Nothing,
            ParseOutcome::RequestNak => self.send_nak(),
            ParseOutcome::Timeout => self.escalate(CriticalError::IntegrityTimeout).into(),
            ParseOutcome::NoFreeSlot => self.escalate(CriticalError::NoFreeSlot).into(),
            ParseOutcome::Frame(slot) => self.dispatch(now, slot),
        }
    }

    fn send_nak(&mut self) -> EngineOutcome {
        match self.nak.request_nak(&mut self.transport) {
            NakStatus::Sent => {
                self.stats.naks_sent += 1;
                self.activity.signal_activity();
                EngineOutcome::NakSent
            }
            NakStatus::TooMany => self.escalate(CriticalError::TooManyNaks).into(),
        }
    }

    fn escalate(&mut self, err: CriticalError) -> CriticalError {
        self.stats.critical_errors += 1;
        error!(role = ?self.role, %err, "link escalation");
        err
    }

    fn dispatch(&mut self, now: Millis, slot: SlotId) -> EngineOutcome {
        self.activity.signal_activity();

        let command = self
            .inbound
            .bytes(slot)
            .ok()
            .and_then(|frame| frame.get(COMMAND_OFFSET).copied())
            .and_then(|code| Command::try_from(code).ok());

        match command {
            Some(Command::Ack) => {
                self.stats.acks_received += 1;
                let _ = self.inbound.delete_slot(slot);
                self.confirm_oldest();
                EngineOutcome::Nothing
            }
            Some(Command::Nak) => {
                self.stats.naks_received += 1;
                let _ = self.inbound.delete_slot(slot);
                match self.resend_oldest(now) {
                    Ok(()) => EngineOutcome::Nothing,
                    Err(err) => err.into(),
                }
            }
            Some(command) => {
                let sent = self.transport.transmit(&self.ack_frame);
                if sent != self.ack_frame.len() {
                    warn!(sent, "short write while sending ACK");
                }
                self.stats.acks_sent += 1;
                self.stats.messages_received += 1;
                debug!(?command, %slot, "message received and acknowledged");
                EngineOutcome::NewMessage(slot)
            }
            None => {
                let _ = self.inbound.delete_slot(slot);
                EngineOutcome::Nothing
            }
        }
    }

    /// An ACK confirms the oldest outstanding outbound frame.
    fn confirm_oldest(&mut self) {
        let Some(oldest) = self.outbound.oldest() else {
            debug!("ACK with nothing in flight");
            return;
        };
        let _ = self.outbound.delete_slot(oldest);
        self.stats.deliveries += 1;
        self.nak.reset_counter();
        debug!(%oldest, pending = self.outbound.valid_count(), "outbound message confirmed");
    }

    /// A NAK asks for the oldest outstanding outbound frame again.
    fn resend_oldest(&mut self, now: Millis) -> Result<(), CriticalError> {
        let Some(oldest) = self.outbound.oldest() else {
            debug!("NAK with nothing in flight");
            return Ok(());
        };
        self.retransmit_or_escalate(now, oldest)
    }

    fn retransmit_or_escalate(&mut self, now: Millis, slot: SlotId) -> Result<(), CriticalError> {
        let count = self.outbound.transmission_count(slot).unwrap_or(u8::MAX);
        if count >= self.config.max_transmissions {
            let command = self.outbound_command(slot);
            return Err(self.escalate(CriticalError::RetriesExhausted { command }));
        }
        self.retransmit(now, slot);
        Ok(())
    }

    fn outbound_command(&self, slot: SlotId) -> u8 {
        self.outbound
            .bytes(slot)
            .ok()
            .and_then(|frame| frame.get(COMMAND_OFFSET).copied())
            .unwrap_or_default()
    }

    fn retransmit(&mut self, now: Millis, slot: SlotId) {
        if let Ok(frame) = self.outbound.bytes(slot) {
            let sent = self.transport.transmit(frame);
            if sent != frame.len() {
                warn!(%slot, sent, expected = frame.len(), "short write on retransmission");
            }
        }
        let count = self.outbound.increment_transmission_count(slot).unwrap_or_default();
        let _ = self
            .outbound
            .mark_retransmitted(slot, now, self.config.ack_window_ms);
        self.stats.retransmissions += 1;
        self.activity.signal_activity();
        info!(%slot, transmission = count, "frame retransmitted");
    }

    // ── Transmit path ─────────────────────────────────────────────────────

    /// Frames `data` under `command`, sends it and keeps it until acknowledged.
    ///
    /// # Errors
    ///
    /// - [`TransmitError::Frame`] for ACK/NAK, payloads over 255 bytes, or a
    ///   (command, length) pair the outbound whitelist does not admit.
    /// - [`TransmitError::NoFreeSlot`] when every outbound slot is in flight.
    /// - [`TransmitError::ShortWrite`] when the transport took only part of
    ///   the frame.  The slot is released again.
    pub fn transmit_message(
        &mut self,
        now: Millis,
        command: Command,
        data: &[u8],
    ) -> Result<SlotId, TransmitError> {
        if command.is_link_control() {
            return Err(FrameError::ReservedCommand(command).into());
        }
        let frame = encode_frame(self.role.local_magic(), command, data)?;
        self.role.outbound_whitelist().check(command, data.len())?;

        let slot = self.outbound.free_slot().ok_or(TransmitError::NoFreeSlot)?;
        self.outbound.write(slot, &frame)?;

        let sent = self.transport.transmit(&frame);
        if sent != frame.len() {
            self.outbound.clear_slot(slot)?;
            warn!(?command, sent, expected = frame.len(), "short write; message dropped");
            return Err(TransmitError::ShortWrite {
                sent,
                expected: frame.len(),
            });
        }

        self.outbound.validate(slot, now, self.config.ack_window_ms)?;
        self.outbound.increment_transmission_count(slot)?;
        self.stats.frames_sent += 1;
        self.activity.signal_activity();
        trace!(?command, len = data.len(), %slot, "message sent");
        Ok(slot)
    }

    /// Outbound messages whose acknowledgement deadline has passed.
    pub fn count_timeouts(&self, now: Millis) -> usize {
        self.outbound.count_timed_out(now)
    }

    pub fn is_oldest_outbound_timed_out(&self, now: Millis) -> bool {
        self.outbound.is_oldest_timed_out(now)
    }

    /// Re-sends every outbound message whose deadline has passed, oldest first.
    ///
    /// Returns how many frames were sent again.
    ///
    /// # Errors
    ///
    /// [`CriticalError::RetriesExhausted`] as soon as a timed-out message has
    /// already been sent `max_transmissions` times.
    pub fn handle_timeouts(&mut self, now: Millis) -> Result<usize, CriticalError> {
        let expired = self.outbound.timed_out(now);
        for slot in &expired {
            self.retransmit_or_escalate(now, *slot)?;
        }
        Ok(expired.len())
    }

    // ── Received messages ─────────────────────────────────────────────────

    pub fn newest_received(&self) -> Option<SlotId> {
        self.inbound.newest()
    }

    /// The received message that has waited longest.
    pub fn oldest_received(&self) -> Option<SlotId> {
        self.inbound.oldest()
    }

    /// Command and payload of a received message still held in `slot`.
    pub fn received(&self, slot: SlotId) -> Option<ReceivedMessage<'_>> {
        if !self.inbound.is_valid(slot) {
            return None;
        }
        let frame = self.inbound.bytes(slot).ok()?;
        let command = Command::try_from(*frame.get(COMMAND_OFFSET)?).ok()?;
        Some(ReceivedMessage {
            command,
            data: frame_payload(frame),
        })
    }

    /// Frees a received message once the application has handled it.
    pub fn delete_received(&mut self, slot: SlotId) -> Result<(), SlotError> {
        self.inbound.delete_slot(slot)
    }

    pub fn pending_received(&self) -> usize {
        self.inbound.valid_count()
    }

    /// Drops received messages nobody consumed within the acknowledgement
    /// window and returns how many were dropped.
    pub fn expire_received(&mut self, now: Millis) -> usize {
        let stale = self.inbound.timed_out(now);
        for slot in &stale {
            let _ = self.inbound.delete_slot(*slot);
        }
        if !stale.is_empty() {
            warn!(count = stale.len(), "expired unconsumed inbound messages");
        }
        stale.len()
    }

    // ── Status and recovery ───────────────────────────────────────────────

    pub fn pending_outbound(&self) -> usize {
        self.outbound.valid_count()
    }

    /// Received bytes not yet consumed by the parser.
    pub fn pending_bytes(&self) -> usize {
        self.rx.count()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn activity(&self) -> &A {
        &self.activity
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Consecutive NAK requests since the last confirmed delivery.
    pub fn nak_count(&self) -> u8 {
        self.nak.count()
    }

    /// Forgets the consecutive-NAK history after a completed transaction.
    pub fn forgive_naks(&mut self) {
        self.nak.reset_counter();
    }

    /// Discards every in-flight message and all receive state, then resumes
    /// reception.  The one recovery action for any [`CriticalError`].
    pub fn reset_everything(&mut self) {
        self.transport.stop_reception();
        self.rx.clear();
        self.inbound.reset();
        self.outbound.reset();
        self.parser.reset();
        self.nak.reset_counter();
        self.nak.reset_state();
        self.transport.start_reception();
        self.stats.resets += 1;
        info!(role = ?self.role, resets = self.stats.resets, "link reset");
    }
}

impl From<CriticalError> for EngineOutcome {
    fn from(err: CriticalError) -> Self {
        EngineOutcome::Critical(err)
    }
}
