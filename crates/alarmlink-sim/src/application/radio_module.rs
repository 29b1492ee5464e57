//! RadioModule: the module-side program of a simulation run.
//!
//! Stands in for the long-range radio firmware.  Every request from the
//! controller produces at most one reply; replies are queued and sent one at
//! a time so the module, like the controller, never has more than one
//! message awaiting acknowledgement.

use std::collections::VecDeque;

use alarmlink_core::{
    Command, CriticalError, EngineOutcome, LinkConfig, LinkConfigError, LinkStats, Millis,
    ProtocolEngine, Role, SlotId, Transport,
};
use tracing::{debug, info, warn};

use super::LinkEndpoint;

/// Firmware version announced in `ModuleReady`.
pub const FIRMWARE_VERSION: [u8; 2] = [1, 0];

/// First byte of a `RadioStatus` reply.
pub const STATE_READY: u8 = 0x01;
pub const STATE_ASLEEP: u8 = 0x02;

/// First byte of a `PairResult` reply.
pub const PAIR_OK: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    command: Command,
    data: Vec<u8>,
}

/// Radio module application driving one [`ProtocolEngine`].
pub struct RadioModule<T: Transport> {
    engine: ProtocolEngine<T>,
    polls_per_service: usize,
    replies: VecDeque<Reply>,
    in_flight: Option<Reply>,
    channel: u8,
    power: u8,
    asleep: bool,
    paired_with: Option<Vec<u8>>,
    alarms_relayed: u32,
    replies_delivered: u32,
    resets: u64,
}

impl<T: Transport> RadioModule<T> {
    /// Creates the module with a `ModuleReady` announcement queued.
    ///
    /// # Errors
    ///
    /// Returns the engine's [`LinkConfigError`] for an unusable `config`.
    pub fn new(
        config: LinkConfig,
        transport: T,
        polls_per_service: usize,
    ) -> Result<Self, LinkConfigError> {
        let engine = ProtocolEngine::new(config, Role::Module, transport)?;
        let mut replies = VecDeque::new();
        replies.push_back(Reply {
            command: Command::ModuleReady,
            data: FIRMWARE_VERSION.to_vec(),
        });

        Ok(Self {
            engine,
            polls_per_service: polls_per_service.max(1),
            replies,
            in_flight: None,
            channel: 0,
            power: 0,
            asleep: false,
            paired_with: None,
            alarms_relayed: 0,
            replies_delivered: 0,
            resets: 0,
        })
    }

    /// `RadioTransmit` requests seen, duplicates included.
    pub fn alarms_relayed(&self) -> u32 {
        self.alarms_relayed
    }

    /// Replies acknowledged by the controller.
    pub fn replies_delivered(&self) -> u32 {
        self.replies_delivered
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    /// `(channel, power)` from the last `RadioConfigure`.
    pub fn radio_settings(&self) -> (u8, u8) {
        (self.channel, self.power)
    }

    pub fn paired_with(&self) -> Option<&[u8]> {
        self.paired_with.as_deref()
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn stats(&self) -> &LinkStats {
        self.engine.stats()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.engine.transport_mut()
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn status(&self) -> Vec<u8> {
        let state = if self.asleep { STATE_ASLEEP } else { STATE_READY };
        vec![state, self.channel, self.power]
    }

    fn queue(&mut self, command: Command, data: Vec<u8>) {
        self.replies.push_back(Reply { command, data });
    }

    fn on_message(&mut self, slot: SlotId) {
        let Some(message) = self.engine.received(slot) else {
            return;
        };
        let command = message.command;
        let data = message.data.to_vec();
        if let Err(e) = self.engine.delete_received(slot) {
            warn!("could not release received message: {e}");
        }

        match command {
            Command::RadioTransmit => {
                self.asleep = false;
                self.alarms_relayed += 1;
                let seq = data.first().copied().unwrap_or_default();
                debug!(seq, "alarm relayed over the air");
                self.queue(Command::TransmitDone, vec![seq]);
            }
            Command::RadioConfigure => {
                // The whitelist guarantees at least two bytes.
                if let [channel, power, ..] = data.as_slice() {
                    self.channel = *channel;
                    self.power = *power;
                }
                info!(channel = self.channel, power = self.power, "radio configured");
                let status = self.status();
                self.queue(Command::RadioStatus, status);
            }
            Command::RadioQuery => {
                let status = self.status();
                self.queue(Command::RadioStatus, status);
            }
            Command::PairRequest => {
                let mut result = vec![PAIR_OK];
                result.extend(data.iter().take(7));
                self.paired_with = Some(data);
                self.queue(Command::PairResult, result);
            }
            Command::Sleep => {
                self.asleep = true;
                info!("radio module going to sleep");
            }
            other => warn!(?other, "unexpected command from controller"),
        }
    }

    fn recover(&mut self, err: CriticalError) {
        warn!(%err, "module link failed; resetting");
        self.engine.reset_everything();
        self.resets += 1;
        if let Some(reply) = self.in_flight.take() {
            self.replies.push_front(reply);
        }
    }

    fn send_next(&mut self, now: Millis) {
        if self.in_flight.is_none() && self.engine.pending_outbound() == 0 {
            let Some(reply) = self.replies.pop_front() else {
                return;
            };
            match self.engine.transmit_message(now, reply.command, &reply.data) {
                Ok(_) => self.in_flight = Some(reply),
                Err(e) => {
                    warn!(command = ?reply.command, "reply failed, will retry: {e}");
                    self.replies.push_front(reply);
                }
            }
        }
    }
}

impl<T: Transport> LinkEndpoint for RadioModule<T> {
    fn feed(&mut self, now: Millis, byte: u8) {
        self.engine.on_byte_received(now, byte);
    }

    fn service(&mut self, now: Millis) {
        for _ in 0..self.polls_per_service {
            match self.engine.parse_incoming(now) {
                EngineOutcome::NewMessage(slot) => self.on_message(slot),
                EngineOutcome::Critical(err) => {
                    self.recover(err);
                    break;
                }
                EngineOutcome::NakSent | EngineOutcome::Nothing => {}
            }
            if self.engine.pending_bytes() == 0 {
                break;
            }
        }

        if let Err(err) = self.engine.handle_timeouts(now) {
            self.recover(err);
        }
        self.engine.expire_received(now);

        if self.in_flight.is_some() && self.engine.pending_outbound() == 0 {
            self.in_flight = None;
            self.replies_delivered += 1;
        }
        self.send_next(now);
    }

    fn is_finished(&self) -> bool {
        self.replies.is_empty() && self.in_flight.is_none()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use alarmlink_core::protocol::frame::{control_frame, encode_frame, CONTROLLER_MAGIC};
    use alarmlink_core::protocol::frame_payload;
    use alarmlink_core::BufferedTransport;

    /// A module whose `ModuleReady` has already been sent and acknowledged.
    fn ready_module() -> RadioModule<BufferedTransport> {
        let mut m = RadioModule::new(LinkConfig::default(), BufferedTransport::new(), 8)
            .expect("default config is valid");
        m.service(0);
        m.transport_mut().take_bytes();
        feed(&mut m, 1, &control_frame(CONTROLLER_MAGIC, Command::Ack));
        m.service(2);
        m
    }

    fn feed(m: &mut RadioModule<BufferedTransport>, now: Millis, bytes: &[u8]) {
        for &b in bytes {
            m.feed(now, b);
        }
    }

    /// Splits the queued wire bytes into frames and returns the non-ACK ones.
    fn sent_frames(m: &mut RadioModule<BufferedTransport>) -> Vec<Vec<u8>> {
        let wire = m.transport_mut().take_bytes();
        let mut frames = Vec::new();
        let mut rest = &wire[..];
        while rest.len() >= 4 {
            let len = 4 + rest[2] as usize;
            let (frame, tail) = rest.split_at(len);
            if frame[1] != Command::Ack as u8 {
                frames.push(frame.to_vec());
            }
            rest = tail;
        }
        frames
    }

    #[test]
    fn test_announces_module_ready_on_start() {
        // Arrange
        let mut m = RadioModule::new(LinkConfig::default(), BufferedTransport::new(), 8).unwrap();

        // Act
        m.service(0);
        let frames = sent_frames(&mut m);

        // Assert
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], Command::ModuleReady as u8);
        assert_eq!(frame_payload(&frames[0]), &FIRMWARE_VERSION);
        assert!(!m.is_finished());
    }

    #[test]
    fn test_ready_module_is_finished() {
        let m = ready_module();

        assert!(m.is_finished());
        assert_eq!(m.replies_delivered(), 1);
    }

    #[test]
    fn test_radio_transmit_is_answered_with_transmit_done() {
        // Arrange
        let mut m = ready_module();
        let alarm = encode_frame(CONTROLLER_MAGIC, Command::RadioTransmit, &[9, 1, 77]).unwrap();

        // Act
        feed(&mut m, 10, &alarm);
        m.service(11);
        let frames = sent_frames(&mut m);

        // Assert
        assert_eq!(m.alarms_relayed(), 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], Command::TransmitDone as u8);
        assert_eq!(frame_payload(&frames[0]), &[9]);
    }

    #[test]
    fn test_configure_updates_settings_and_reports_status() {
        let mut m = ready_module();
        let configure =
            encode_frame(CONTROLLER_MAGIC, Command::RadioConfigure, &[7, 3]).unwrap();

        feed(&mut m, 10, &configure);
        m.service(11);
        let frames = sent_frames(&mut m);

        assert_eq!(m.radio_settings(), (7, 3));
        assert_eq!(frames[0][1], Command::RadioStatus as u8);
        assert_eq!(frame_payload(&frames[0]), &[STATE_READY, 7, 3]);
    }

    #[test]
    fn test_pair_request_is_answered_with_pair_result() {
        let mut m = ready_module();
        let request =
            encode_frame(CONTROLLER_MAGIC, Command::PairRequest, &[0xA1, 0xB2]).unwrap();

        feed(&mut m, 10, &request);
        m.service(11);
        let frames = sent_frames(&mut m);

        assert_eq!(m.paired_with(), Some(&[0xA1, 0xB2][..]));
        assert_eq!(frame_payload(&frames[0]), &[PAIR_OK, 0xA1, 0xB2]);
    }

    #[test]
    fn test_sleep_is_recorded_without_reply() {
        // Arrange
        let mut m = ready_module();
        let sleep = encode_frame(CONTROLLER_MAGIC, Command::Sleep, &[]).unwrap();
        let query = encode_frame(CONTROLLER_MAGIC, Command::RadioQuery, &[]).unwrap();

        // Act
        feed(&mut m, 10, &sleep);
        m.service(11);
        let after_sleep = sent_frames(&mut m);
        feed(&mut m, 12, &query);
        m.service(13);
        let after_query = sent_frames(&mut m);

        // Assert
        assert!(m.is_asleep());
        assert!(after_sleep.is_empty());
        assert_eq!(frame_payload(&after_query[0])[0], STATE_ASLEEP);
    }

    #[test]
    fn test_replies_are_sent_one_at_a_time() {
        // Arrange
        let mut m = ready_module();
        let mut wire = encode_frame(CONTROLLER_MAGIC, Command::RadioTransmit, &[1]).unwrap();
        wire.extend(encode_frame(CONTROLLER_MAGIC, Command::RadioTransmit, &[2]).unwrap());

        // Act
        feed(&mut m, 10, &wire);
        m.service(11);
        let first = sent_frames(&mut m);
        feed(&mut m, 12, &control_frame(CONTROLLER_MAGIC, Command::Ack));
        m.service(13);
        let second = sent_frames(&mut m);

        // Assert
        assert_eq!(first.len(), 1);
        assert_eq!(frame_payload(&first[0]), &[1]);
        assert_eq!(second.len(), 1);
        assert_eq!(frame_payload(&second[0]), &[2]);
    }

    #[test]
    fn test_unanswered_reply_is_requeued_after_reset() {
        // Arrange – ModuleReady is never acknowledged
        let mut m = RadioModule::new(LinkConfig::default(), BufferedTransport::new(), 8).unwrap();
        m.service(0);

        // Act
        m.service(1_001);
        m.service(2_002);
        m.service(3_003);

        // Assert
        assert_eq!(m.resets(), 1);
        assert_eq!(m.stats().frames_sent, 2);
        assert!(!m.is_finished());
    }
}
