//! Simulated serial line between the two chips.
//!
//! A real UART loses, garbles and occasionally repeats bytes.  [`FaultInjector`]
//! reproduces that from a seeded random generator so a failing run can be
//! replayed exactly, and [`LossyLine`] adds a fixed delivery latency measured
//! on the simulation clock.
//!
//! The two runners built on top:
//!
//! - **`virtual_run`** – steps both endpoints on a shared `u32` clock.
//!   Deterministic for a given seed.
//! - **`live`** – runs each endpoint as a tokio task on the wall clock, with
//!   channels for the wire.

use std::collections::VecDeque;

use alarmlink_core::Millis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::application::scenario::{LineStats, ScenarioError};
use crate::infrastructure::storage::{ConfigError, LineConfig};

pub mod live;
pub mod virtual_run;

pub use live::run_live;
pub use virtual_run::run_virtual;

impl From<ConfigError> for ScenarioError {
    fn from(e: ConfigError) -> Self {
        ScenarioError::InvalidConfig(e.to_string())
    }
}

/// Stream numbers so the two directions draw independent fault sequences
/// from one configured seed.
pub const TO_MODULE_STREAM: u64 = 1;
pub const TO_CONTROLLER_STREAM: u64 = 2;

// ── FaultInjector ─────────────────────────────────────────────────────────────

/// Applies drop, bit-flip and duplication faults to a byte stream.
#[derive(Debug)]
pub struct FaultInjector {
    rng: StdRng,
    drop_p: f64,
    corrupt_p: f64,
    duplicate_p: f64,
    stats: LineStats,
}

impl FaultInjector {
    /// Creates an injector for one direction of the line.
    ///
    /// Probabilities outside `0.0..=1.0` are clamped.
    pub fn new(config: &LineConfig, stream: u64) -> Self {
        let seed = config
            .seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(stream);
        Self {
            rng: StdRng::seed_from_u64(seed),
            drop_p: clamp_probability(config.drop_probability),
            corrupt_p: clamp_probability(config.corrupt_probability),
            duplicate_p: clamp_probability(config.duplicate_probability),
            stats: LineStats::default(),
        }
    }

    /// Passes one byte through the line, appending zero, one or two bytes to `out`.
    pub fn pass(&mut self, byte: u8, out: &mut Vec<u8>) {
        self.stats.bytes_offered += 1;
        if self.drop_p > 0.0 && self.rng.gen_bool(self.drop_p) {
            self.stats.dropped += 1;
            return;
        }

        let mut delivered = byte;
        if self.corrupt_p > 0.0 && self.rng.gen_bool(self.corrupt_p) {
            delivered ^= 1u8 << self.rng.gen_range(0..8u32);
            self.stats.corrupted += 1;
        }
        out.push(delivered);
        self.stats.bytes_delivered += 1;

        if self.duplicate_p > 0.0 && self.rng.gen_bool(self.duplicate_p) {
            out.push(delivered);
            self.stats.bytes_delivered += 1;
            self.stats.duplicated += 1;
        }
    }

    /// Passes a whole chunk through the line.
    pub fn pass_all(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len());
        for &b in bytes {
            self.pass(b, &mut out);
        }
        out
    }

    pub fn stats(&self) -> &LineStats {
        &self.stats
    }

    pub fn into_stats(self) -> LineStats {
        self.stats
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

// ── LossyLine ─────────────────────────────────────────────────────────────────

/// One direction of the serial line on the virtual clock.
#[derive(Debug)]
pub struct LossyLine {
    injector: FaultInjector,
    latency_ms: Millis,
    /// `(sent_at, byte)` in send order.
    in_transit: VecDeque<(Millis, u8)>,
}

impl LossyLine {
    pub fn new(config: &LineConfig, stream: u64) -> Self {
        Self {
            injector: FaultInjector::new(config, stream),
            latency_ms: config.latency_ms,
            in_transit: VecDeque::new(),
        }
    }

    /// Puts `bytes` on the line at time `now`.
    pub fn send(&mut self, now: Millis, bytes: &[u8]) {
        for byte in self.injector.pass_all(bytes) {
            self.in_transit.push_back((now, byte));
        }
    }

    /// Removes and returns every byte whose latency has elapsed at `now`.
    pub fn deliver_due(&mut self, now: Millis) -> Vec<u8> {
        let mut due = Vec::new();
        while let Some(&(sent_at, byte)) = self.in_transit.front() {
            if now.wrapping_sub(sent_at) < self.latency_ms {
                break;
            }
            self.in_transit.pop_front();
            due.push(byte);
        }
        due
    }

    /// `true` when no byte is in transit.
    pub fn is_idle(&self) -> bool {
        self.in_transit.is_empty()
    }

    pub fn stats(&self) -> &LineStats {
        self.injector.stats()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
