//! Byte buffers sitting between the serial transport and the frame parser.

pub mod receive;
pub mod ring;

pub use receive::{ReceiveBuffer, RX_BUFFER_CAPACITY};
pub use ring::{ByteRing, RingError};
