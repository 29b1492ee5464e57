//! alarmlink-sim entry point.
//!
//! Runs one scenario over the simulated serial link and prints a report.
//!
//! ```text
//! main()
//!  └─ load SimConfig (file or defaults) and apply CLI overrides
//!  └─ run_virtual()   -- stepped clock, deterministic   (default)
//!     or run_live()   -- tokio tasks on the wall clock  (--live)
//!  └─ print the ScenarioReport as text or JSON
//! ```
//!
//! Examples:
//!
//! ```bash
//! alarmlink-sim --messages 100
//! alarmlink-sim --config lossy.toml --seed 7 --json
//! alarmlink-sim --write-default-config alarmlink-sim.toml
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alarmlink_sim::infrastructure::serial::{run_live, run_virtual};
use alarmlink_sim::infrastructure::storage::{load_config, save_config, SimConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Alarm transmitter serial-link simulator.
///
/// Wires a controller to a simulated radio module over a serial line that
/// drops, corrupts and duplicates bytes, and reports how the link coped.
#[derive(Debug, Parser)]
#[command(
    name = "alarmlink-sim",
    about = "Simulates the controller/radio-module serial link under fault injection",
    version
)]
struct Cli {
    /// TOML configuration file.  Missing files fall back to defaults.
    #[arg(long, env = "ALARMLINK_SIM_CONFIG")]
    config: Option<PathBuf>,

    /// Run on the wall clock with tokio tasks instead of the virtual clock.
    #[arg(long)]
    live: bool,

    /// Overrides `[line] seed`.
    #[arg(long)]
    seed: Option<u64>,

    /// Overrides `[scenario] message_count`.
    #[arg(long)]
    messages: Option<u32>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Write a configuration file with every default value and exit.
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

impl Cli {
    /// Loads the configuration file (if any) and applies overrides.
    fn into_sim_config(self) -> anyhow::Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => SimConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.line.seed = seed;
        }
        if let Some(messages) = self.messages {
            config.scenario.message_count = messages;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.write_default_config {
        save_config(path, &SimConfig::default())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote default configuration to {}", path.display());
        return Ok(());
    }

    let live = cli.live;
    let json = cli.json;
    let config = cli.into_sim_config()?;

    // `RUST_LOG` wins; otherwise use the level from the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.sim.log_level)),
        )
        .init();

    config.validate().context("configuration rejected")?;
    info!(
        live,
        messages = config.scenario.message_count,
        seed = config.line.seed,
        "alarmlink-sim starting"
    );

    let report = if live {
        run_live(config).await?
    } else {
        run_virtual(&config)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }

    if !report.completed {
        anyhow::bail!(
            "scenario did not complete: {}/{} alarms delivered",
            report.delivered,
            report.requested
        );
    }
    Ok(())
}
