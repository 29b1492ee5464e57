//! Deterministic runner on a stepped virtual clock.
//!
//! Each tick services both endpoints, moves what they wrote onto their
//! [`LossyLine`], and feeds every byte whose latency has elapsed to the other
//! side.  Nothing depends on wall-clock time, so a given configuration and
//! seed always produce the same report (apart from the run id).

use alarmlink_core::{BufferedTransport, Millis};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::alarm_controller::AlarmController;
use crate::application::radio_module::RadioModule;
use crate::application::scenario::{
    EndpointReport, RunMode, ScenarioError, ScenarioPlan, ScenarioReport,
};
use crate::application::LinkEndpoint;
use crate::infrastructure::storage::SimConfig;

use super::{LossyLine, TO_CONTROLLER_STREAM, TO_MODULE_STREAM};

/// Runs the configured scenario to completion or until `duration_ms` of
/// virtual time has passed.
///
/// # Errors
///
/// [`ScenarioError::InvalidConfig`] or [`ScenarioError::Link`] when the
/// configuration cannot be run.  An unfinished run is not an error; it is
/// reported with `completed == false`.
pub fn run_virtual(config: &SimConfig) -> Result<ScenarioReport, ScenarioError> {
    config.validate()?;

    let plan = ScenarioPlan::from(&config.scenario);
    let mut controller =
        AlarmController::new(config.link.clone(), BufferedTransport::new(), plan.clone())?;
    let mut module = RadioModule::new(
        config.link.clone(),
        BufferedTransport::new(),
        plan.polls_per_service,
    )?;
    let mut to_module = LossyLine::new(&config.line, TO_MODULE_STREAM);
    let mut to_controller = LossyLine::new(&config.line, TO_CONTROLLER_STREAM);

    let run_id = Uuid::new_v4();
    let step = config.scenario.poll_interval_ms;
    let limit = u64::from(config.scenario.duration_ms);
    let mut now: Millis = config.scenario.clock_origin;
    let mut elapsed: u64 = 0;

    info!(
        %run_id,
        messages = plan.message_count,
        origin = now,
        seed = config.line.seed,
        "virtual run starting"
    );

    let completed = loop {
        controller.service(now);
        module.service(now);

        let outgoing = controller.transport_mut().take_bytes();
        to_module.send(now, &outgoing);
        let outgoing = module.transport_mut().take_bytes();
        to_controller.send(now, &outgoing);

        for byte in to_module.deliver_due(now) {
            module.feed(now, byte);
        }
        for byte in to_controller.deliver_due(now) {
            controller.feed(now, byte);
        }

        if controller.is_finished()
            && module.is_finished()
            && to_module.is_idle()
            && to_controller.is_idle()
        {
            break true;
        }
        if elapsed >= limit {
            break false;
        }

        elapsed += u64::from(step);
        now = now.wrapping_add(step);
        if now < step {
            debug!(now, "virtual clock wrapped");
        }
    };

    if completed {
        info!(%run_id, elapsed_ms = elapsed, "virtual run completed");
    } else {
        warn!(
            %run_id,
            delivered = controller.delivered(),
            requested = controller.requested(),
            "virtual run hit its time limit"
        );
    }

    Ok(ScenarioReport {
        run_id,
        mode: RunMode::Virtual,
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
        to_module: to_module.stats().clone(),
        to_controller: to_controller.stats().clone(),
        elapsed_ms: elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(messages: u32) -> SimConfig {
        let mut cfg = SimConfig::default();
        cfg.scenario.message_count = messages;
        cfg.scenario.send_interval_ms = 10;
        cfg
    }

    #[test]
    fn test_invalid_config_is_rejected_before_running() {
        let mut cfg = config(1);
        cfg.link.pool_slots = 0;

        let result = run_virtual(&cfg);

        assert!(matches!(result, Err(ScenarioError::InvalidConfig(_))));
    }

    #[test]
    fn test_clean_run_confirms_every_alarm() {
        // Arrange
        let cfg = config(5);

        // Act
        let report = run_virtual(&cfg).expect("valid config");

        // Assert
        assert!(report.completed);
        assert_eq!(report.delivered, 5);
        assert_eq!(report.confirmations, 5);
        assert_eq!(report.duplicate_replies, 0);
        assert_eq!(report.controller.link.retransmissions, 0);
        assert_eq!(report.module.link.retransmissions, 0);
        assert_eq!(report.to_module.dropped, 0);
    }

    #[test]
    fn test_time_limit_stops_a_run_that_cannot_finish() {
        // Arrange – nothing ever reaches the module
        let mut cfg = config(2);
        cfg.line.drop_probability = 1.0;
        cfg.scenario.duration_ms = 5_000;

        // Act
        let report = run_virtual(&cfg).expect("valid config");

        // Assert
        assert!(!report.completed);
        assert_eq!(report.delivered, 0);
        assert!(report.controller.resets >= 1);
        assert!(report.elapsed_ms >= 5_000);
    }
}
