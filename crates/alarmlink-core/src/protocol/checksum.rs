//! 8-bit XOR folding checksum.
//!
//! The checksum byte appended to a frame is the XOR of every preceding byte,
//! folded into [`CHECKSUM_SEED`].  Because XOR is its own inverse, folding the
//! *whole* frame including that trailing byte yields zero for an intact frame,
//! so verification needs no knowledge of where the checksum sits.

/// Starting value of the fold.
pub const CHECKSUM_SEED: u8 = 0xAA;

/// XOR-folds `bytes` into the seed.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(CHECKSUM_SEED, |acc, b| acc ^ b)
}

/// Returns `true` if `frame` (including its trailing checksum byte) folds to zero.
pub fn verify(frame: &[u8]) -> bool {
    checksum(frame) == 0
}
