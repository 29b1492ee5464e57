//! Live runner: both endpoints as tokio tasks on the wall clock.
//!
//! # Task layout
//!
//! ```text
//! controller task ──mpsc──▶ relay (FaultInjector) ──mpsc──▶ module task
//! controller task ◀──mpsc── relay (FaultInjector) ◀──mpsc── module task
//! ```
//!
//! Each endpoint task wakes on a `tokio::time::interval` tick, drains the
//! bytes that arrived since the last tick, and services its endpoint.  The
//! relays add latency and faults.  Each channel has a single producer and a
//! single consumer.
//!
//! While an engine is resetting it calls `stop_reception`, which closes the
//! endpoint's [`AtomicBool`] gate.  The relay feeding that endpoint checks
//! the gate as each chunk comes off the line and discards chunks that arrive
//! while it is closed, as a disabled UART interrupt would lose them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alarmlink_core::{Millis, Transport};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::alarm_controller::AlarmController;
use crate::application::radio_module::RadioModule;
use crate::application::scenario::{
    EndpointReport, LineStats, RunMode, ScenarioError, ScenarioPlan, ScenarioReport,
};
use crate::application::LinkEndpoint;
use crate::infrastructure::storage::SimConfig;

use super::{FaultInjector, TO_CONTROLLER_STREAM, TO_MODULE_STREAM};

// ── ChannelTransport ──────────────────────────────────────────────────────────

/// A [`Transport`] that writes each frame into an unbounded channel.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: UnboundedSender<Vec<u8>>,
    receiving: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Creates the transport and returns the reception gate it controls.
    pub fn new(tx: UnboundedSender<Vec<u8>>) -> (Self, Arc<AtomicBool>) {
        let receiving = Arc::new(AtomicBool::new(false));
        let transport = Self {
            tx,
            receiving: Arc::clone(&receiving),
        };
        (transport, receiving)
    }
}

impl Transport for ChannelTransport {
    fn transmit(&mut self, frame: &[u8]) -> usize {
        match self.tx.send(frame.to_vec()) {
            Ok(()) => frame.len(),
            Err(_) => 0,
        }
    }

    fn start_reception(&mut self) {
        self.receiving.store(true, Ordering::Release);
    }

    fn stop_reception(&mut self) {
        self.receiving.store(false, Ordering::Release);
    }
}

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Wall-clock milliseconds since `start`, offset by `origin` and wrapping
/// like the firmware's 32-bit counter.
#[derive(Debug, Clone, Copy)]
struct LinkClock {
    start: Instant,
    origin: Millis,
}

impl LinkClock {
    fn now(&self) -> Millis {
        // Truncation to 32 bits is the counter's wraparound.
        self.origin
            .wrapping_add(self.start.elapsed().as_millis() as Millis)
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

/// Carries chunks from one endpoint to the other.  `gate` is the receiving
/// endpoint's reception gate.
async fn relay(
    mut from: UnboundedReceiver<Vec<u8>>,
    to: UnboundedSender<Vec<u8>>,
    gate: Arc<AtomicBool>,
    mut injector: FaultInjector,
    latency: Duration,
) -> LineStats {
    while let Some(chunk) = from.recv().await {
        let delivered = injector.pass_all(&chunk);
        if !latency.is_zero() {
            sleep(latency).await;
        }
        if !gate.load(Ordering::Acquire) {
            debug!(len = delivered.len(), "reception disabled; bytes discarded");
            continue;
        }
        if !delivered.is_empty() && to.send(delivered).is_err() {
            debug!("receiving endpoint gone; relay stopping");
            break;
        }
    }
    injector.into_stats()
}

struct DriveParams {
    clock: LinkClock,
    poll: Duration,
    deadline: Instant,
    /// Published by this endpoint.
    finished: Arc<AtomicBool>,
    /// Published by the other endpoint.
    peer_finished: Arc<AtomicBool>,
}

/// Services `endpoint` every tick until both ends are finished or the
/// deadline passes, then hands it back for reporting.
async fn drive<E: LinkEndpoint>(
    mut endpoint: E,
    mut inbox: UnboundedReceiver<Vec<u8>>,
    params: DriveParams,
) -> E {
    let mut ticker = interval(params.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let now = params.clock.now();

        while let Ok(chunk) = inbox.try_recv() {
            for byte in chunk {
                endpoint.feed(now, byte);
            }
        }
        endpoint.service(now);

        let finished = endpoint.is_finished();
        params.finished.store(finished, Ordering::Release);
        if finished && params.peer_finished.load(Ordering::Acquire) {
            break;
        }
        if Instant::now() >= params.deadline {
            break;
        }
    }
    endpoint
}

// ── Runner ────────────────────────────────────────────────────────────────────

/// Runs the configured scenario on the wall clock.
///
/// Takes at most `duration_ms` of real time plus one poll interval.
///
/// # Errors
///
/// [`ScenarioError::InvalidConfig`] or [`ScenarioError::Link`] when the
/// configuration cannot be run, [`ScenarioError::Task`] if a task panics.
pub async fn run_live(config: SimConfig) -> Result<ScenarioReport, ScenarioError> {
    config.validate()?;

    let plan = ScenarioPlan::from(&config.scenario);
    let (controller_out, to_module_in) = mpsc::unbounded_channel();
    let (to_module_out, module_in) = mpsc::unbounded_channel();
    let (module_out, to_controller_in) = mpsc::unbounded_channel();
    let (to_controller_out, controller_in) = mpsc::unbounded_channel();

    let (controller_transport, controller_gate) = ChannelTransport::new(controller_out);
    let (module_transport, module_gate) = ChannelTransport::new(module_out);
    let controller = AlarmController::new(config.link.clone(), controller_transport, plan.clone())?;
    let module = RadioModule::new(config.link.clone(), module_transport, plan.polls_per_service)?;

    let latency = Duration::from_millis(u64::from(config.line.latency_ms));
    let to_module = tokio::spawn(relay(
        to_module_in,
        to_module_out,
        module_gate,
        FaultInjector::new(&config.line, TO_MODULE_STREAM),
        latency,
    ));
    let to_controller = tokio::spawn(relay(
        to_controller_in,
        to_controller_out,
        controller_gate,
        FaultInjector::new(&config.line, TO_CONTROLLER_STREAM),
        latency,
    ));

    let run_id = Uuid::new_v4();
    let start = Instant::now();
    let clock = LinkClock {
        start,
        origin: config.scenario.clock_origin,
    };
    let poll = Duration::from_millis(u64::from(config.scenario.poll_interval_ms));
    let deadline = start + Duration::from_millis(u64::from(config.scenario.duration_ms));
    let controller_finished = Arc::new(AtomicBool::new(false));
    let module_finished = Arc::new(AtomicBool::new(false));

    info!(%run_id, messages = plan.message_count, "live run starting");

    let controller_task = tokio::spawn(drive(
        controller,
        controller_in,
        DriveParams {
            clock,
            poll,
            deadline,
            finished: Arc::clone(&controller_finished),
            peer_finished: Arc::clone(&module_finished),
        },
    ));
    let module_task = tokio::spawn(drive(
        module,
        module_in,
        DriveParams {
            clock,
            poll,
            deadline,
            finished: module_finished,
            peer_finished: controller_finished,
        },
    ));

    let task_failed = |e: tokio::task::JoinError| ScenarioError::Task(e.to_string());
    let controller = controller_task.await.map_err(task_failed)?;
    let module = module_task.await.map_err(task_failed)?;
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let completed = controller.is_finished() && module.is_finished();
    let mut report = ScenarioReport {
        run_id,
        mode: RunMode::Live,
        completed,
        requested: controller.requested(),
        delivered: controller.delivered(),
        confirmations: controller.confirmations(),
        duplicate_replies: controller.duplicate_replies(),
        module_replies: module.replies_delivered(),
        controller: EndpointReport {
            link: controller.stats().clone(),
            resets: controller.resets(),
        },
        module: EndpointReport {
            link: module.stats().clone(),
            resets: module.resets(),
        },
        to_module: LineStats::default(),
        to_controller: LineStats::default(),
        elapsed_ms,
    };

    // Dropping the endpoints closes their channels, which ends the relays.
    drop(controller);
    drop(module);
    report.to_module = to_module.await.map_err(task_failed)?;
    report.to_controller = to_controller.await.map_err(task_failed)?;

    if completed {
        info!(%run_id, elapsed_ms, "live run completed");
    } else {
        warn!(
            %run_id,
            delivered = report.delivered,
            requested = report.requested,
            "live run hit its time limit"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_transport_sends_whole_frames() {
        // Arrange
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut transport, _gate) = ChannelTransport::new(tx);

        // Act
        let sent = transport.transmit(&[0x01, 0x11, 0x00, 0xBA]);

        // Assert
        assert_eq!(sent, 4);
        assert_eq!(rx.try_recv().unwrap(), vec![0x01, 0x11, 0x00, 0xBA]);
    }

    #[test]
    fn test_channel_transport_reports_nothing_sent_when_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (mut transport, _gate) = ChannelTransport::new(tx);
        drop(rx);

        assert_eq!(transport.transmit(&[1, 2, 3, 4]), 0);
    }

    #[test]
    fn test_reception_gate_follows_start_and_stop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut transport, gate) = ChannelTransport::new(tx);

        assert!(!gate.load(Ordering::Acquire));
        transport.start_reception();
        assert!(gate.load(Ordering::Acquire));
        transport.stop_reception();
        assert!(!gate.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_relay_applies_faults_and_returns_stats() {
        // Arrange
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let line = crate::infrastructure::storage::LineConfig {
            duplicate_probability: 1.0,
            ..Default::default()
        };
        let task = tokio::spawn(relay(
            in_rx,
            out_tx,
            Arc::new(AtomicBool::new(true)),
            FaultInjector::new(&line, 1),
            Duration::ZERO,
        ));

        // Act
        in_tx.send(vec![5, 6]).unwrap();
        drop(in_tx);
        let stats = task.await.unwrap();

        // Assert
        assert_eq!(out_rx.recv().await, Some(vec![5, 5, 6, 6]));
        assert_eq!(stats.duplicated, 2);
    }

    #[tokio::test]
    async fn test_relay_discards_chunks_while_reception_is_stopped() {
        // Arrange – the receiving endpoint is mid-reset
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (dest_tx, _dest_rx) = mpsc::unbounded_channel();
        let (mut receiver, gate) = ChannelTransport::new(dest_tx);
        receiver.start_reception();
        receiver.stop_reception();
        let line = crate::infrastructure::storage::LineConfig::default();
        let task = tokio::spawn(relay(
            in_rx,
            out_tx,
            gate,
            FaultInjector::new(&line, 1),
            Duration::ZERO,
        ));

        // Act
        in_tx.send(vec![0x02, 0x50, 0x00, 0xF8]).unwrap();
        drop(in_tx);
        let stats = task.await.unwrap();

        // Assert
        assert_eq!(out_rx.recv().await, None, "nothing may reach a stopped receiver");
        assert_eq!(stats.bytes_offered, 4);
    }
}
