//! Infrastructure layer for the link simulator.
//!
//! Contains everything that touches the outside world or a clock: the
//! fault-injecting serial line, the virtual and live runners, and TOML
//! configuration storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `alarmlink_core`, but MUST NOT be imported by the `application` layer.

pub mod serial;
pub mod storage;

use crate::application::scenario::ScenarioPlan;
use storage::ScenarioConfig;

impl From<&ScenarioConfig> for ScenarioPlan {
    fn from(config: &ScenarioConfig) -> Self {
        Self {
            message_count: config.message_count,
            send_interval_ms: config.send_interval_ms,
            polls_per_service: config.polls_per_tick,
        }
    }
}
