//! # alarmlink-core
//!
//! Reliable framed message delivery between a wearable alarm transmitter's
//! controller and its companion long-range radio module.
//!
//! The crate has no dependencies on OS APIs, threads or async runtimes.  The
//! platform supplies bytes as they arrive, a millisecond clock reading with
//! each call, and a [`Transport`] that can send a buffer.
//!
//! # Architecture overview (for beginners)
//!
//! The two chips talk over a UART that can drop, corrupt, delay or duplicate
//! bytes.  Everything above the UART is built from small pieces, leaves first:
//!
//! - **`buffer`** – a fixed-capacity byte ring and the receive buffer that
//!   remembers whether it ever overflowed.
//! - **`timer`** – a deadline timer that stays correct when the 32-bit
//!   millisecond counter wraps around.
//! - **`protocol`** – the frame layout, XOR checksum, per-direction command
//!   whitelists, the resynchronising frame parser and the NAK escalation guard.
//! - **`slots`** – a fixed pool of message buffers ordered by age, used for
//!   frames received and for frames sent but not yet acknowledged.
//! - **`engine`** – [`ProtocolEngine`] ties it all together: it acknowledges
//!   what it receives, retransmits what is not acknowledged, and reports
//!   anything it cannot recover from as a [`CriticalError`].

pub mod buffer;
pub mod engine;
pub mod protocol;
pub mod slots;
pub mod timer;
pub mod transport;

// Re-export the most-used types at the crate root so callers can write
// `alarmlink_core::ProtocolEngine` instead of the full module path.
pub use engine::{
    CriticalError, EngineOutcome, LinkConfig, LinkConfigError, LinkStats, ProtocolEngine,
    ReceivedMessage, TransmitError,
};
pub use protocol::frame::{Command, FrameError, Role};
pub use slots::{MessageSlotStore, SlotError, SlotId};
pub use timer::{Millis, SoftwareTimer};
pub use transport::{ActivityIndicator, BufferedTransport, NoActivity, Transport};
