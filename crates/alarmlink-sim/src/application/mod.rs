//! Application layer: the two programs that talk over the simulated link.
//!
//! # What is the "application" layer? (for beginners)
//!
//! On the real hardware each chip runs firmware on top of the link protocol.
//! The controller decides when to raise an alarm; the radio module relays it
//! over the air and reports back.  This layer models both programs:
//!
//! - **`alarm_controller`** – sends a configuration message, a series of
//!   alarms and finally a sleep request, one message at a time, and checks
//!   that every alarm is confirmed by the module.
//! - **`radio_module`** – answers each request the way the radio firmware
//!   does and announces itself with `ModuleReady` at start-up.
//! - **`scenario`** – the plan both programs follow and the report a run
//!   produces.
//!
//! Code here depends only on `alarmlink-core` and the [`Transport`] trait.
//! It never touches threads, channels, clocks or files; the infrastructure
//! layer feeds it bytes and time.
//!
//! [`Transport`]: alarmlink_core::Transport

use alarmlink_core::Millis;

pub mod alarm_controller;
pub mod radio_module;
pub mod scenario;

/// One end of the link as seen by a simulation driver.
///
/// A driver repeatedly feeds received bytes, calls [`service`](Self::service)
/// once per clock tick, and stops once both ends report
/// [`is_finished`](Self::is_finished).
pub trait LinkEndpoint {
    /// Hands one byte that arrived from the peer to the endpoint.
    fn feed(&mut self, now: Millis, byte: u8);

    /// Runs one round of parsing, timeout handling and sending.
    fn service(&mut self, now: Millis);

    /// `true` once the endpoint has nothing left to send or wait for.
    fn is_finished(&self) -> bool;
}
