//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the simulator's TOML file, falls back to
//! defaults when the file does not exist, and writes a default file on request
//! so users have a template to edit.

pub mod config;

pub use config::{
    load_config, save_config, ConfigError, LineConfig, ScenarioConfig, SimConfig, SimSection,
};
