//! End-to-end tests wiring a controller engine and a module engine back to back.
//!
//! Bytes move between the two ends only when a test calls [`Link::pump`], so
//! each test controls exactly what the wire does: deliver, drop or corrupt.

use alarmlink_core::{
    BufferedTransport, Command, CriticalError, EngineOutcome, LinkConfig, Millis, ProtocolEngine,
    Role,
};

type Engine = ProtocolEngine<BufferedTransport>;

struct Link {
    controller: Engine,
    module: Engine,
}

impl Link {
    fn new() -> Self {
        let engine = |role| {
            ProtocolEngine::new(LinkConfig::default(), role, BufferedTransport::new())
                .expect("default config is valid")
        };
        Self {
            controller: engine(Role::Controller),
            module: engine(Role::Module),
        }
    }

    /// Delivers everything queued on both sides and polls each parser until
    /// its receive buffer is empty.  Returns the non-trivial outcomes seen by
    /// (controller, module).
    fn pump(&mut self, now: Millis) -> (Vec<EngineOutcome>, Vec<EngineOutcome>) {
        let mut seen = (Vec::new(), Vec::new());
        for _ in 0..8 {
            let to_module = self.controller.transport_mut().take_bytes();
            let to_controller = self.module.transport_mut().take_bytes();
            if to_module.is_empty()
                && to_controller.is_empty()
                && self.controller.pending_bytes() == 0
                && self.module.pending_bytes() == 0
            {
                break;
            }
            self.module.on_bytes_received(now, &to_module);
            self.controller.on_bytes_received(now, &to_controller);
            seen.0.extend(poll_all(&mut self.controller, now));
            seen.1.extend(poll_all(&mut self.module, now));
        }
        seen
    }
}

fn poll_all(engine: &mut Engine, now: Millis) -> Vec<EngineOutcome> {
    let mut outcomes = Vec::new();
    for _ in 0..64 {
        let before = engine.pending_bytes();
        let outcome = engine.parse_incoming(now);
        if outcome != EngineOutcome::Nothing {
            outcomes.push(outcome);
        }
        if engine.pending_bytes() == 0 || engine.pending_bytes() == before {
            break;
        }
    }
    outcomes
}

#[test]
fn test_ack_inside_window_frees_slot_without_retransmission() {
    // Arrange
    let mut link = Link::new();

    // Act
    link.controller
        .transmit_message(0, Command::RadioTransmit, &[0x2A])
        .unwrap();
    let (controller_seen, module_seen) = link.pump(10);

    // Assert
    assert!(controller_seen.is_empty());
    assert_eq!(module_seen.len(), 1);
    assert!(matches!(module_seen[0], EngineOutcome::NewMessage(_)));
    assert_eq!(link.controller.pending_outbound(), 0);
    assert_eq!(link.controller.stats().deliveries, 1);
    assert_eq!(link.controller.handle_timeouts(5_000), Ok(0));
    assert_eq!(link.controller.stats().retransmissions, 0);
}

#[test]
fn test_module_sees_payload_and_replies() {
    // Arrange
    let mut link = Link::new();
    link.controller
        .transmit_message(0, Command::RadioTransmit, &[7, 1, 88])
        .unwrap();
    let (_, module_seen) = link.pump(1);
    let EngineOutcome::NewMessage(slot) = module_seen[0] else {
        panic!("module did not receive the alarm");
    };

    // Act
    let message = link.module.received(slot).expect("message is held");
    assert_eq!(message.command, Command::RadioTransmit);
    assert_eq!(message.data, &[7, 1, 88]);
    link.module.delete_received(slot).unwrap();
    link.module
        .transmit_message(2, Command::TransmitDone, &[7])
        .unwrap();
    let (controller_seen, _) = link.pump(3);

    // Assert
    let EngineOutcome::NewMessage(reply) = controller_seen[0] else {
        panic!("controller did not receive the reply");
    };
    let reply = link.controller.received(reply).unwrap();
    assert_eq!(reply.command, Command::TransmitDone);
    assert_eq!(reply.data, &[7]);
    assert_eq!(link.module.pending_outbound(), 0);
}

#[test]
fn test_silent_peer_gets_three_transmissions_then_failure() {
    // Arrange
    let mut link = Link::new();
    link.controller
        .transmit_message(0, Command::RadioTransmit, &[1])
        .unwrap();

    // Act – the module never answers; nothing is pumped
    let mut results = Vec::new();
    let mut now: Millis = 0;
    for _ in 0..4 {
        now += 1_001;
        results.push(link.controller.handle_timeouts(now));
    }

    // Assert
    assert_eq!(results[0], Ok(1));
    assert_eq!(results[1], Ok(1));
    assert_eq!(
        results[2],
        Err(CriticalError::RetriesExhausted { command: 0x20 })
    );
    assert_eq!(link.controller.transport().frames_sent(), 3);
}

#[test]
fn test_corrupted_frame_is_nakked_and_resent() {
    // Arrange
    let mut link = Link::new();
    link.controller
        .transmit_message(0, Command::RadioConfigure, &[0x01, 0x02, 0x03])
        .unwrap();
    let mut wire = link.controller.transport_mut().take_bytes();
    wire[4] ^= 0x10;

    // Act
    link.module.on_bytes_received(1, &wire);
    let module_first = poll_all(&mut link.module, 1);
    let (controller_seen, module_seen) = link.pump(2);

    // Assert
    assert_eq!(module_first, vec![EngineOutcome::NakSent]);
    assert!(controller_seen.is_empty());
    assert_eq!(module_seen.len(), 1);
    assert!(matches!(module_seen[0], EngineOutcome::NewMessage(_)));
    assert_eq!(link.controller.stats().retransmissions, 1);
    assert_eq!(link.controller.stats().naks_received, 1);
    assert_eq!(link.controller.pending_outbound(), 0);
}

#[test]
fn test_delivery_across_clock_wraparound() {
    // Arrange
    let mut link = Link::new();
    let start: Millis = u32::MAX - 400;
    link.controller
        .transmit_message(start, Command::RadioQuery, &[])
        .unwrap();

    // Act – the first copy is lost, the retry goes out after the counter wrapped
    link.controller.transport_mut().take_bytes();
    let before_deadline = start.wrapping_add(1_000);
    let after_deadline = start.wrapping_add(1_001);
    let early = link.controller.handle_timeouts(before_deadline);
    let resent = link.controller.handle_timeouts(after_deadline);
    link.pump(after_deadline);

    // Assert
    assert!(after_deadline < start, "the clock must have wrapped");
    assert_eq!(early, Ok(0));
    assert_eq!(resent, Ok(1));
    assert_eq!(link.controller.pending_outbound(), 0);
    assert_eq!(link.controller.stats().deliveries, 1);
}

#[test]
fn test_reset_recovers_after_escalation() {
    // Arrange
    let mut link = Link::new();
    link.controller
        .transmit_message(0, Command::Sleep, &[])
        .unwrap();
    link.controller.transport_mut().take_bytes();
    for now in [1_001, 2_002] {
        link.controller.handle_timeouts(now).unwrap();
    }
    link.controller.transport_mut().take_bytes();
    assert!(link.controller.handle_timeouts(3_003).is_err());

    // Act
    link.controller.reset_everything();
    link.controller
        .transmit_message(3_004, Command::Sleep, &[])
        .unwrap();
    link.pump(3_005);

    // Assert
    assert_eq!(link.controller.pending_outbound(), 0);
    assert_eq!(link.controller.stats().resets, 1);
    assert_eq!(link.controller.stats().deliveries, 1);
}
