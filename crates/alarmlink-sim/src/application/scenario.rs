//! Scenario plan, run report and run errors.

use alarmlink_core::{LinkConfigError, LinkStats, Millis};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// What the controller does during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioPlan {
    /// Alarms to deliver.
    pub message_count: u32,
    /// Minimum gap between two messages sent by the controller.
    pub send_interval_ms: Millis,
    /// Upper bound on parser steps per [`service`](super::LinkEndpoint::service) call.
    pub polls_per_service: usize,
}

impl Default for ScenarioPlan {
    fn default() -> Self {
        Self {
            message_count: 20,
            send_interval_ms: 50,
            polls_per_service: 8,
        }
    }
}

/// Error type for running a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    #[error("link config rejected: {0}")]
    Link(#[from] LinkConfigError),

    /// A live-mode task panicked or was cancelled.
    #[error("simulation task failed: {0}")]
    Task(String),
}

/// How the clock advanced during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Stepped clock, fully deterministic for a given seed.
    Virtual,
    /// Wall clock, tokio tasks and channels.
    Live,
}

/// Byte counters for one direction of the serial line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    /// Bytes written by the sender.
    pub bytes_offered: u64,
    /// Bytes that reached the receiver, duplicates included.
    pub bytes_delivered: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub duplicated: u64,
}

/// Counters from one endpoint at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointReport {
    pub link: LinkStats,
    /// Times the application answered a critical error with a full reset.
    pub resets: u64,
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    /// `true` when both endpoints finished before the time limit.
    pub completed: bool,
    pub requested: u32,
    /// Alarms the controller saw acknowledged by the module.
    pub delivered: u32,
    /// Distinct `TransmitDone` replies matched to a delivered alarm.
    pub confirmations: u32,
    /// `TransmitDone` replies for an alarm already confirmed.
    pub duplicate_replies: u32,
    /// Replies the module saw acknowledged by the controller.
    pub module_replies: u32,
    pub controller: EndpointReport,
    pub module: EndpointReport,
    pub to_module: LineStats,
    pub to_controller: LineStats,
    /// Virtual or wall-clock milliseconds from start to finish.
    pub elapsed_ms: u64,
}

impl ScenarioReport {
    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mode = match self.mode {
            RunMode::Virtual => "virtual",
            RunMode::Live => "live",
        };
        format!(
            "run {} ({mode}, {} ms): {}\n\
             alarms: {}/{} delivered, {} confirmed, {} duplicate replies\n\
             controller: {} sent, {} resent, {} NAKs sent, {} resets\n\
             module: {} replies delivered, {} resent, {} NAKs sent, {} resets\n\
             line to module: {} bytes, {} dropped, {} corrupted, {} duplicated\n\
             line to controller: {} bytes, {} dropped, {} corrupted, {} duplicated",
            self.run_id,
            self.elapsed_ms,
            if self.completed { "completed" } else { "INCOMPLETE" },
            self.delivered,
            self.requested,
            self.confirmations,
            self.duplicate_replies,
            self.controller.link.frames_sent,
            self.controller.link.retransmissions,
            self.controller.link.naks_sent,
            self.controller.resets,
            self.module_replies,
            self.module.link.retransmissions,
            self.module.link.naks_sent,
            self.module.resets,
            self.to_module.bytes_offered,
            self.to_module.dropped,
            self.to_module.corrupted,
            self.to_module.duplicated,
            self.to_controller.bytes_offered,
            self.to_controller.dropped,
            self.to_controller.corrupted,
            self.to_controller.duplicated,
        )
    }
}
