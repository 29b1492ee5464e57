//! TOML-based configuration for the link simulator.
//!
//! A complete file looks like this; every key is optional and falls back to
//! the default shown:
//!
//! ```toml
//! [sim]
//! log_level = "info"
//!
//! [link]
//! integrity_timeout_ms = 100
//! ack_window_ms = 1000
//! max_transmissions = 3
//! nak_limit = 3
//! pool_slots = 5
//! slot_capacity = 40
//!
//! [line]
//! drop_probability = 0.0
//! corrupt_probability = 0.0
//! duplicate_probability = 0.0
//! latency_ms = 2
//! seed = 24301
//!
//! [scenario]
//! message_count = 20
//! send_interval_ms = 50
//! poll_interval_ms = 5
//! polls_per_tick = 8
//! duration_ms = 60000
//! clock_origin = 0
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent, so a file that only sets
//! `[line] drop_probability = 0.02` is a valid configuration.

use std::path::{Path, PathBuf};

use alarmlink_core::{LinkConfig, LinkConfigError, Millis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The `[link]` section cannot drive a protocol engine.
    #[error("invalid [link] section: {0}")]
    Link(#[from] LinkConfigError),

    /// A value is outside its allowed range.
    #[error("invalid setting: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SimConfig {
    #[serde(default)]
    pub sim: SimSection,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

/// General simulator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimSection {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Fault model applied independently to each direction of the serial line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineConfig {
    /// Chance that a byte never arrives.
    #[serde(default)]
    pub drop_probability: f64,
    /// Chance that one bit of a delivered byte is flipped.
    #[serde(default)]
    pub corrupt_probability: f64,
    /// Chance that a delivered byte arrives twice.
    #[serde(default)]
    pub duplicate_probability: f64,
    /// Delay between a byte being sent and it arriving.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: Millis,
    /// Seed for the fault generator.  The same seed replays the same faults.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// What the simulated controller does and how the clock advances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioConfig {
    /// Alarms the controller sends.
    #[serde(default = "default_message_count")]
    pub message_count: u32,
    /// Minimum gap between two messages sent by the controller.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: Millis,
    /// Clock step between two service rounds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: Millis,
    /// Upper bound on parser steps per service round.
    #[serde(default = "default_polls_per_tick")]
    pub polls_per_tick: usize,
    /// Give up after this much (virtual or wall-clock) time.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: Millis,
    /// Link clock reading at the start of the run.  Set close to `u32::MAX`
    /// to exercise counter wraparound.
    #[serde(default)]
    pub clock_origin: Millis,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_latency_ms() -> Millis {
    2
}
fn default_seed() -> u64 {
    0x5EED
}
fn default_message_count() -> u32 {
    20
}
fn default_send_interval_ms() -> Millis {
    50
}
fn default_poll_interval_ms() -> Millis {
    5
}
fn default_polls_per_tick() -> usize {
    8
}
fn default_duration_ms() -> Millis {
    60_000
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            drop_probability: 0.0,
            corrupt_probability: 0.0,
            duplicate_probability: 0.0,
            latency_ms: default_latency_ms(),
            seed: default_seed(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            message_count: default_message_count(),
            send_interval_ms: default_send_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            polls_per_tick: default_polls_per_tick(),
            duration_ms: default_duration_ms(),
            clock_origin: 0,
        }
    }
}

impl SimConfig {
    /// Checks every section for values the simulator cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Link`] for an unusable `[link]` section and
    /// [`ConfigError::Invalid`] for out-of-range line or scenario settings,
    /// including a poll interval longer than the link's maximum.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link.validate()?;

        let probabilities = [
            ("drop_probability", self.line.drop_probability),
            ("corrupt_probability", self.line.corrupt_probability),
            ("duplicate_probability", self.line.duplicate_probability),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(format!(
                    "[line] {name} = {p} is not within 0.0..=1.0"
                )));
            }
        }

        let scenario = &self.scenario;
        if scenario.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "[scenario] poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        let max_poll = self.link.max_poll_interval_ms();
        if scenario.poll_interval_ms > max_poll {
            return Err(ConfigError::Invalid(format!(
                "[scenario] poll_interval_ms = {} exceeds the link's maximum of {max_poll} ms",
                scenario.poll_interval_ms
            )));
        }
        if scenario.polls_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "[scenario] polls_per_tick must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `SimConfig` from `path`, returning `SimConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<SimConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: SimConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SimConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path` as pretty TOML, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &SimConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_config_is_valid() {
        // Arrange / Act
        let cfg = SimConfig::default();

        // Assert
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sim.log_level, "info");
        assert_eq!(cfg.link, LinkConfig::default());
        assert_eq!(cfg.scenario.message_count, 20);
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: SimConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, SimConfig::default());
    }

    #[test]
    fn test_deserialize_partial_sections_override_defaults() {
        // Arrange
        let toml_str = r#"
[link]
ack_window_ms = 250

[line]
drop_probability = 0.02
seed = 7
"#;

        // Act
        let cfg: SimConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.link.ack_window_ms, 250);
        assert_eq!(cfg.link.integrity_timeout_ms, 100);
        assert_eq!(cfg.line.drop_probability, 0.02);
        assert_eq!(cfg.line.seed, 7);
        assert_eq!(cfg.line.latency_ms, 2);
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<SimConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_probability_out_of_range_is_rejected() {
        let mut cfg = SimConfig::default();
        cfg.line.corrupt_probability = 1.5;

        let err = cfg.validate().unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("corrupt_probability")));
    }

    #[test]
    fn test_poll_interval_beyond_link_contract_is_rejected() {
        // Arrange – the default integrity window allows at most 25 ms
        let mut cfg = SimConfig::default();
        cfg.scenario.poll_interval_ms = 30;

        // Act
        let result = cfg.validate();

        // Assert
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_link_section_is_reported() {
        let mut cfg = SimConfig::default();
        cfg.link.slot_capacity = 8;

        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Link(LinkConfigError::SlotTooSmall(8)))
        ));
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/alarmlink.toml");

        let cfg = load_config(&path).expect("absent file falls back to defaults");

        assert_eq!(cfg, SimConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("alarmlink_test_{}", Uuid::new_v4()));
        let path = dir.join("nested").join("sim.toml");
        let mut cfg = SimConfig::default();
        cfg.line.drop_probability = 0.05;
        cfg.scenario.clock_origin = u32::MAX - 1_000;
        cfg.sim.log_level = "debug".to_string();

        // Act
        save_config(&path, &cfg).expect("save");
        let loaded = load_config(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }
}
