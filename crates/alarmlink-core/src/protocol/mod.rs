//! Wire protocol: frame layout, checksum, parser and NAK escalation.

pub mod checksum;
pub mod frame;
pub mod nak;
pub mod parser;

pub use checksum::{checksum, verify, CHECKSUM_SEED};
pub use frame::{
    control_frame, encode_frame, frame_payload, Command, CommandSpec, FrameError, Role, Whitelist,
    CONTROLLER_MAGIC, MAX_FRAME_LEN, MAX_PAYLOAD_LEN, MIN_FRAME_LEN, MODULE_MAGIC,
};
pub use nak::{NakEscalation, NakStatus, DEFAULT_NAK_LIMIT};
pub use parser::{FailureCause, FrameParser, ParseOutcome, DEFAULT_ACK_WINDOW_MS, DEFAULT_INTEGRITY_TIMEOUT_MS};
