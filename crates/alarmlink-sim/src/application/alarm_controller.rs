//! AlarmController: the controller-side program of a simulation run.
//!
//! The controller configures the radio, sends each alarm as a
//! `RadioTransmit [seq, alarm_code, battery_percent]` frame, and ends with a
//! `Sleep` request.  It keeps at most one message in flight.  An ACK only
//! says "the oldest outbound message arrived", so with a single message in
//! flight there is never any doubt which one was confirmed.
//!
//! When the engine reports a critical error the controller does what the
//! firmware does: reset the whole link and start the in-flight message over.

use std::collections::{BTreeSet, VecDeque};

use alarmlink_core::{
    Command, CriticalError, EngineOutcome, LinkConfig, LinkConfigError, LinkStats, Millis,
    ProtocolEngine, Role, SlotId, Transport,
};
use tracing::{debug, info, trace, warn};

use super::scenario::ScenarioPlan;
use super::LinkEndpoint;

/// Radio channel requested at start-up.
pub const RADIO_CHANNEL: u8 = 7;
/// Transmit power step requested at start-up.
pub const RADIO_POWER: u8 = 3;

/// One alarm as carried in a `RadioTransmit` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    pub seq: u8,
    pub code: u8,
    pub battery_percent: u8,
}

impl Alarm {
    /// The `index`-th alarm of a run.  Sequence numbers wrap at 256.
    pub fn for_index(index: u32) -> Self {
        Self {
            seq: (index % 256) as u8,
            code: (index % 4) as u8 + 1,
            battery_percent: 100 - (index % 50) as u8,
        }
    }

    pub fn payload(&self) -> [u8; 3] {
        [self.seq, self.code, self.battery_percent]
    }
}

/// A message the controller still has to get across.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outgoing {
    Configure { channel: u8, power: u8 },
    Alarm(Alarm),
    Sleep,
}

impl Outgoing {
    fn command(&self) -> Command {
        match self {
            Outgoing::Configure { .. } => Command::RadioConfigure,
            Outgoing::Alarm(_) => Command::RadioTransmit,
            Outgoing::Sleep => Command::Sleep,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Outgoing::Configure { channel, power } => vec![*channel, *power],
            Outgoing::Alarm(alarm) => alarm.payload().to_vec(),
            Outgoing::Sleep => Vec::new(),
        }
    }
}

/// Controller application driving one [`ProtocolEngine`].
pub struct AlarmController<T: Transport> {
    engine: ProtocolEngine<T>,
    plan: ScenarioPlan,
    queue: VecDeque<Outgoing>,
    in_flight: Option<Outgoing>,
    last_send: Option<Millis>,
    delivered: u32,
    /// Sequence numbers delivered but not yet answered by `TransmitDone`.
    unconfirmed: BTreeSet<u8>,
    confirmations: u32,
    duplicate_replies: u32,
    status_reports: u32,
    module_ready: bool,
    resets: u64,
}

impl<T: Transport> AlarmController<T> {
    /// Creates the controller and queues the whole scenario.
    ///
    /// # Errors
    ///
    /// Returns the engine's [`LinkConfigError`] for an unusable `config`.
    pub fn new(config: LinkConfig, transport: T, plan: ScenarioPlan) -> Result<Self, LinkConfigError> {
        let engine = ProtocolEngine::new(config, Role::Controller, transport)?;

        let mut queue = VecDeque::with_capacity(plan.message_count as usize + 2);
        queue.push_back(Outgoing::Configure {
            channel: RADIO_CHANNEL,
            power: RADIO_POWER,
        });
        queue.extend((0..plan.message_count).map(|i| Outgoing::Alarm(Alarm::for_index(i))));
        queue.push_back(Outgoing::Sleep);

        Ok(Self {
            engine,
            plan,
            queue,
            in_flight: None,
            last_send: None,
            delivered: 0,
            unconfirmed: BTreeSet::new(),
            confirmations: 0,
            duplicate_replies: 0,
            status_reports: 0,
            module_ready: false,
            resets: 0,
        })
    }

    pub fn requested(&self) -> u32 {
        self.plan.message_count
    }

    /// Alarms acknowledged by the module.
    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    pub fn confirmations(&self) -> u32 {
        self.confirmations
    }

    pub fn duplicate_replies(&self) -> u32 {
        self.duplicate_replies
    }

    pub fn status_reports(&self) -> u32 {
        self.status_reports
    }

    pub fn module_ready(&self) -> bool {
        self.module_ready
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

    fn on_message(&mut self, slot: SlotId) {
        let Some(message) = self.engine.received(slot) else {
            return;
        };
        let command = message.command;
        let first = message.data.first().copied();

        match command {
            Command::TransmitDone => {
                let Some(seq) = first else { return };
                if self.unconfirmed.remove(&seq) {
                    self.confirmations += 1;
                    debug!(seq, "alarm confirmed by module");
                } else {
                    self.duplicate_replies += 1;
                    debug!(seq, "duplicate or unmatched TransmitDone");
                }
            }
            Command::ModuleReady => {
                self.module_ready = true;
                info!("radio module ready");
            }
            Command::RadioStatus | Command::PairResult | Command::RadioReceived => {
                self.status_reports += 1;
                trace!(?command, "status report from module");
            }
            other => warn!(?other, "unexpected command from module"),
        }

        if let Err(e) = self.engine.delete_received(slot) {
            warn!("could not release received message: {e}");
        }
    }

    fn recover(&mut self, err: CriticalError) {
        warn!(%err, "controller link failed; resetting");
        self.engine.reset_everything();
        self.resets += 1;
        if let Some(message) = self.in_flight.take() {
            self.queue.push_front(message);
        }
    }

    fn track_delivery(&mut self) {
        if self.engine.pending_outbound() != 0 {
            return;
        }
        match self.in_flight.take() {
            Some(Outgoing::Alarm(alarm)) => {
                self.delivered += 1;
                self.unconfirmed.insert(alarm.seq);
                debug!(seq = alarm.seq, delivered = self.delivered, "alarm delivered");
            }
            Some(other) => debug!(command = ?other.command(), "message delivered"),
            None => {}
        }
    }

    fn send_next(&mut self, now: Millis) {
        if self.in_flight.is_some() {
            return;
        }
        if let Some(last) = self.last_send {
            if now.wrapping_sub(last) < self.plan.send_interval_ms {
                return;
            }
        }
        let Some(message) = self.queue.pop_front() else {
            return;
        };

        match self
            .engine
            .transmit_message(now, message.command(), &message.payload())
        {
            Ok(_) => {
                self.in_flight = Some(message);
                self.last_send = Some(now);
            }
            Err(e) => {
                warn!(command = ?message.command(), "send failed, will retry: {e}");
                self.queue.push_front(message);
            }
        }
    }
}

impl<T: Transport> LinkEndpoint for AlarmController<T> {
    fn feed(&mut self, now: Millis, byte: u8) {
        self.engine.on_byte_received(now, byte);
    }

    fn service(&mut self, now: Millis) {
        for _ in 0..self.plan.polls_per_service.max(1) {
            let outcome = self.engine.parse_incoming(now);
            // The module's ACK and its TransmitDone usually arrive together;
            // the alarm must count as delivered before the reply is matched.
            self.track_delivery();
            match outcome {
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
        self.track_delivery();
        self.send_next(now);
    }

    fn is_finished(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_none()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use alarmlink_core::protocol::frame::{control_frame, encode_frame, MODULE_MAGIC};
    use alarmlink_core::protocol::frame_payload;
    use alarmlink_core::BufferedTransport;

    fn controller(messages: u32) -> AlarmController<BufferedTransport> {
        let plan = ScenarioPlan {
            message_count: messages,
            send_interval_ms: 10,
            polls_per_service: 8,
        };
        AlarmController::new(LinkConfig::default(), BufferedTransport::new(), plan)
            .expect("default config is valid")
    }

    fn feed_all(c: &mut AlarmController<BufferedTransport>, now: Millis, bytes: &[u8]) {
        for &b in bytes {
            c.feed(now, b);
        }
    }

    fn ack() -> [u8; 4] {
        control_frame(MODULE_MAGIC, Command::Ack)
    }

    #[test]
    fn test_alarm_payload_layout() {
        let alarm = Alarm::for_index(261);

        assert_eq!(alarm.payload(), [5, 2, 89]);
    }

    #[test]
    fn test_first_message_configures_the_radio() {
        // Arrange
        let mut c = controller(1);

        // Act
        c.service(0);
        let wire = c.transport_mut().take_bytes();

        // Assert
        assert_eq!(wire[1], Command::RadioConfigure as u8);
        assert_eq!(frame_payload(&wire), &[RADIO_CHANNEL, RADIO_POWER]);
    }

    #[test]
    fn test_only_one_message_in_flight() {
        // Arrange
        let mut c = controller(3);
        c.service(0);
        c.transport_mut().take_bytes();

        // Act – plenty of time passes, but nothing has been acknowledged
        c.service(50);

        // Assert
        assert!(c.transport_mut().take_bytes().is_empty());
        assert!(!c.is_finished());
    }

    #[test]
    fn test_ack_then_transmit_done_confirms_alarm() {
        // Arrange – get past the configure message
        let mut c = controller(1);
        c.service(0);
        c.transport_mut().take_bytes();
        feed_all(&mut c, 1, &ack());
        c.service(2);
        c.service(20);
        let wire = c.transport_mut().take_bytes();
        assert_eq!(wire[1], Command::RadioTransmit as u8);
        let seq = frame_payload(&wire)[0];

        // Act
        feed_all(&mut c, 21, &ack());
        c.service(22);
        let done = encode_frame(MODULE_MAGIC, Command::TransmitDone, &[seq]).unwrap();
        feed_all(&mut c, 23, &done);
        feed_all(&mut c, 23, &done);
        c.service(24);

        // Assert
        assert_eq!(c.delivered(), 1);
        assert_eq!(c.confirmations(), 1);
        assert_eq!(c.duplicate_replies(), 1);
    }

    #[test]
    fn test_module_ready_is_recorded_and_acknowledged() {
        let mut c = controller(1);
        let ready = encode_frame(MODULE_MAGIC, Command::ModuleReady, &[1, 0]).unwrap();

        feed_all(&mut c, 0, &ready);
        c.service(1);

        assert!(c.module_ready());
        assert_eq!(c.stats().acks_sent, 1);
    }

    #[test]
    fn test_critical_error_resets_and_requeues_message() {
        // Arrange – the configure message is never acknowledged
        let mut c = controller(1);
        c.service(0);

        // Act – three transmissions, then the retry limit trips
        c.service(1_001);
        c.service(2_002);
        c.service(3_003);

        // Assert – reset happened and the same message went out again
        assert_eq!(c.resets(), 1);
        assert_eq!(c.stats().resets, 1);
        assert_eq!(c.stats().frames_sent, 2);
        assert!(!c.is_finished());
    }

    #[test]
    fn test_finishes_after_sleep_is_acknowledged() {
        // Arrange
        let mut c = controller(0);
        let mut now = 0;

        // Act – acknowledge configure and sleep
        for _ in 0..2 {
            c.service(now);
            c.transport_mut().take_bytes();
            feed_all(&mut c, now + 1, &ack());
            now += 20;
        }
        c.service(now);

        // Assert
        assert!(c.is_finished());
        assert_eq!(c.delivered(), 0);
    }
}
