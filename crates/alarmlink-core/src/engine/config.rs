//! Tunable link parameters.
//!
//! Every field carries a `#[serde(default = "...")]` so a TOML table that only
//! overrides one value still deserialises into a complete, usable config.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::frame::MAX_FRAME_LEN;
use crate::protocol::nak::DEFAULT_NAK_LIMIT;
use crate::protocol::parser::{DEFAULT_ACK_WINDOW_MS, DEFAULT_INTEGRITY_TIMEOUT_MS};
use crate::timer::Millis;

/// Reasons a [`LinkConfig`] cannot drive an engine.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum LinkConfigError {
    #[error("slot capacity {0} is smaller than the largest frame ({MAX_FRAME_LEN} bytes)")]
    SlotTooSmall(usize),

    #[error("the slot pool must hold at least one slot")]
    EmptyPool,

    /// A timeout or limit that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Timing, retry and pool parameters for one end of the link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkConfig {
    /// How long a partial frame may wait for its next byte before the
    /// receive buffer is flushed.
    #[serde(default = "default_integrity_timeout_ms")]
    pub integrity_timeout_ms: Millis,
    /// Outbound: how long to wait for an ACK before retransmitting.
    /// Inbound: how long an unconsumed message stays fresh.
    #[serde(default = "default_ack_window_ms")]
    pub ack_window_ms: Millis,
    /// Total transmissions (first send plus retries) per outbound message.
    #[serde(default = "default_max_transmissions")]
    pub max_transmissions: u8,
    /// Consecutive NAK requests that escalate to a critical error.
    #[serde(default = "default_nak_limit")]
    pub nak_limit: u8,
    /// Slots per direction.
    #[serde(default = "default_pool_slots")]
    pub pool_slots: usize,
    /// Bytes per slot; must hold one complete frame.
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity: usize,
}

fn default_integrity_timeout_ms() -> Millis {
    DEFAULT_INTEGRITY_TIMEOUT_MS
}
fn default_ack_window_ms() -> Millis {
    DEFAULT_ACK_WINDOW_MS
}
fn default_max_transmissions() -> u8 {
    3
}
fn default_nak_limit() -> u8 {
    DEFAULT_NAK_LIMIT
}
fn default_pool_slots() -> usize {
    5
}
fn default_slot_capacity() -> usize {
    40
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            integrity_timeout_ms: default_integrity_timeout_ms(),
            ack_window_ms: default_ack_window_ms(),
            max_transmissions: default_max_transmissions(),
            nak_limit: default_nak_limit(),
            pool_slots: default_pool_slots(),
            slot_capacity: default_slot_capacity(),
        }
    }
}

impl LinkConfig {
    /// Checks that the parameters describe a link that can make progress.
    ///
    /// # Errors
    ///
    /// Returns the first [`LinkConfigError`] found.
    pub fn validate(&self) -> Result<(), LinkConfigError> {
        if self.slot_capacity < MAX_FRAME_LEN {
            return Err(LinkConfigError::SlotTooSmall(self.slot_capacity));
        }
        if self.pool_slots == 0 {
            return Err(LinkConfigError::EmptyPool);
        }
        if self.integrity_timeout_ms == 0 {
            return Err(LinkConfigError::Zero("integrity_timeout_ms"));
        }
        if self.ack_window_ms == 0 {
            return Err(LinkConfigError::Zero("ack_window_ms"));
        }
        if self.max_transmissions == 0 {
            return Err(LinkConfigError::Zero("max_transmissions"));
        }
        if self.nak_limit == 0 {
            return Err(LinkConfigError::Zero("nak_limit"));
        }
        Ok(())
    }

    /// The longest gap allowed between two `parse_incoming` calls.
    ///
    /// The parser drops at most one garbage byte per call, so it has to be
    /// polled several times within one integrity window to get through a
    /// corrupted burst before the window expires.
    pub fn max_poll_interval_ms(&self) -> Millis {
        (self.integrity_timeout_ms / 4).max(1)
    }
}
