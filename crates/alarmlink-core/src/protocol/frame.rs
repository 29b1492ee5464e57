//! Frame layout, command codes and per-direction whitelists.
//!
//! Wire format:
//! ```text
//! [magic:1][command:1][length:1][data:length][checksum:1]
//! ```
//! `magic` marks the direction of travel, `length` counts data bytes only,
//! and `checksum` is the XOR fold described in [`super::checksum`].

use thiserror::Error;

use super::checksum::checksum;

// ── Layout constants ──────────────────────────────────────────────────────────

/// Magic byte on frames sent by the wearable's controller to the radio module.
pub const CONTROLLER_MAGIC: u8 = 0x01;

/// Magic byte on frames sent by the radio module to the controller.
pub const MODULE_MAGIC: u8 = 0x02;

/// Magic + command + length.
pub const HEADER_LEN: usize = 3;

pub const CHECKSUM_LEN: usize = 1;

/// Smallest possible frame: a header and a checksum with no data.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;

/// Largest data section any whitelisted command may declare.
pub const MAX_PAYLOAD_LEN: usize = 32;

pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + CHECKSUM_LEN;

/// Offsets of the header fields.
pub const MAGIC_OFFSET: usize = 0;
pub const COMMAND_OFFSET: usize = 1;
pub const LENGTH_OFFSET: usize = 2;

/// Total on-wire size of a frame carrying `data_len` data bytes.
pub const fn frame_len(data_len: usize) -> usize {
    HEADER_LEN + data_len + CHECKSUM_LEN
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while composing an outbound frame.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FrameError {
    /// The payload does not fit the one-byte length field.
    #[error("payload of {0} bytes exceeds the 255-byte length field")]
    PayloadTooLarge(usize),

    /// The (command, length) pair is not in the outbound whitelist.
    #[error("command 0x{command:02X} with length {len} is not whitelisted")]
    NotWhitelisted { command: u8, len: usize },

    /// ACK and NAK are link-control frames and cannot be queued as messages.
    #[error("command {0:?} is reserved for link control")]
    ReservedCommand(Command),
}

// ── Command codes ─────────────────────────────────────────────────────────────

/// Every command code understood on the link, in either direction.
///
/// Whether a code is legal in a given direction is decided by the
/// [`Whitelist`] for that direction, not by this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    // Controller → module (0x10–0x3F)
    RadioConfigure = 0x10,
    RadioQuery = 0x11,
    RadioTransmit = 0x20,
    PairRequest = 0x21,
    Sleep = 0x30,
    // Link control, both directions (0x50–0x5F)
    Ack = 0x50,
    Nak = 0x51,
    // Module → controller (0x60–0x6F)
    RadioStatus = 0x60,
    RadioReceived = 0x61,
    TransmitDone = 0x62,
    PairResult = 0x63,
    ModuleReady = 0x6F,
}

impl Command {
    /// `true` for ACK and NAK, which are never themselves acknowledged.
    pub fn is_link_control(self) -> bool {
        matches!(self, Command::Ack | Command::Nak)
    }
}

impl TryFrom<u8> for Command {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x10 => Ok(Command::RadioConfigure),
            0x11 => Ok(Command::RadioQuery),
            0x20 => Ok(Command::RadioTransmit),
            0x21 => Ok(Command::PairRequest),
            0x30 => Ok(Command::Sleep),
            0x50 => Ok(Command::Ack),
            0x51 => Ok(Command::Nak),
            0x60 => Ok(Command::RadioStatus),
            0x61 => Ok(Command::RadioReceived),
            0x62 => Ok(Command::TransmitDone),
            0x63 => Ok(Command::PairResult),
            0x6F => Ok(Command::ModuleReady),
            _ => Err(()),
        }
    }
}

// ── Whitelists ────────────────────────────────────────────────────────────────

/// One whitelist row: a command and the inclusive range of legal data lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: Command,
    pub min_len: u8,
    pub max_len: u8,
}

impl CommandSpec {
    pub const fn new(command: Command, min_len: u8, max_len: u8) -> Self {
        Self {
            command,
            min_len,
            max_len,
        }
    }

    pub fn admits(&self, len: usize) -> bool {
        (self.min_len as usize..=self.max_len as usize).contains(&len)
    }
}

/// Ordered table of commands accepted in one direction of travel.
///
/// A header is trusted only if its magic matches the direction and its
/// (command, length) pair appears in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Whitelist {
    magic: u8,
    entries: &'static [CommandSpec],
}

const CONTROLLER_TO_MODULE_ENTRIES: [CommandSpec; 7] = [
    CommandSpec::new(Command::Ack, 0, 0),
    CommandSpec::new(Command::Nak, 0, 0),
    CommandSpec::new(Command::RadioConfigure, 2, 8),
    CommandSpec::new(Command::RadioQuery, 0, 0),
    CommandSpec::new(Command::RadioTransmit, 1, MAX_PAYLOAD_LEN as u8),
    CommandSpec::new(Command::PairRequest, 1, 8),
    CommandSpec::new(Command::Sleep, 0, 1),
];

const MODULE_TO_CONTROLLER_ENTRIES: [CommandSpec; 7] = [
    CommandSpec::new(Command::Ack, 0, 0),
    CommandSpec::new(Command::Nak, 0, 0),
    CommandSpec::new(Command::RadioStatus, 1, 8),
    CommandSpec::new(Command::RadioReceived, 1, MAX_PAYLOAD_LEN as u8),
    CommandSpec::new(Command::TransmitDone, 1, 1),
    CommandSpec::new(Command::PairResult, 1, 8),
    CommandSpec::new(Command::ModuleReady, 0, 2),
];

impl Whitelist {
    /// Frames travelling from the controller to the radio module.
    pub const CONTROLLER_TO_MODULE: Whitelist = Whitelist {
        magic: CONTROLLER_MAGIC,
        entries: &CONTROLLER_TO_MODULE_ENTRIES,
    };

    /// Frames travelling from the radio module to the controller.
    pub const MODULE_TO_CONTROLLER: Whitelist = Whitelist {
        magic: MODULE_MAGIC,
        entries: &MODULE_TO_CONTROLLER_ENTRIES,
    };

    /// Builds a custom table, e.g. for a module firmware revision with extra commands.
    pub const fn new(magic: u8, entries: &'static [CommandSpec]) -> Self {
        Self { magic, entries }
    }

    pub fn magic(&self) -> u8 {
        self.magic
    }

    pub fn entries(&self) -> &'static [CommandSpec] {
        self.entries
    }

    /// Looks up the row for `command`.
    pub fn spec_for(&self, command: u8) -> Option<&CommandSpec> {
        self.entries.iter().find(|spec| spec.command as u8 == command)
    }

    /// Validates a raw header triple.
    pub fn accepts(&self, magic: u8, command: u8, len: usize) -> bool {
        magic == self.magic
            && self
                .spec_for(command)
                .is_some_and(|spec| spec.admits(len))
    }

    /// Validates an outbound (command, payload length) pair.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NotWhitelisted`] when the pair is not in the table.
    pub fn check(&self, command: Command, len: usize) -> Result<(), FrameError> {
        if self.accepts(self.magic, command as u8, len) {
            Ok(())
        } else {
            Err(FrameError::NotWhitelisted {
                command: command as u8,
                len,
            })
        }
    }
}

// ── Roles ─────────────────────────────────────────────────────────────────────

/// Which end of the serial link an engine sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The wearable's main microcontroller.
    Controller,
    /// The companion long-range radio module.
    Module,
}

impl Role {
    /// Magic byte stamped on frames this end sends.
    pub fn local_magic(self) -> u8 {
        self.outbound_whitelist().magic()
    }

    /// Magic byte expected on frames this end receives.
    pub fn remote_magic(self) -> u8 {
        self.inbound_whitelist().magic()
    }

    pub fn outbound_whitelist(self) -> Whitelist {
        match self {
            Role::Controller => Whitelist::CONTROLLER_TO_MODULE,
            Role::Module => Whitelist::MODULE_TO_CONTROLLER,
        }
    }

    pub fn inbound_whitelist(self) -> Whitelist {
        match self {
            Role::Controller => Whitelist::MODULE_TO_CONTROLLER,
            Role::Module => Whitelist::CONTROLLER_TO_MODULE,
        }
    }

    /// The role at the other end of the link.
    pub fn peer(self) -> Role {
        match self {
            Role::Controller => Role::Module,
            Role::Module => Role::Controller,
        }
    }
}

// ── Encoding helpers ──────────────────────────────────────────────────────────

/// Encodes a complete frame.  No whitelist check is applied.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if `data` exceeds 255 bytes.
///
/// # Examples
///
/// ```rust
/// use alarmlink_core::protocol::frame::{encode_frame, Command, MODULE_MAGIC};
///
/// let bytes = encode_frame(MODULE_MAGIC, Command::Ack, &[]).unwrap();
/// assert_eq!(bytes, vec![0x02, 0x50, 0x00, 0xF8]);
/// ```
pub fn encode_frame(magic: u8, command: Command, data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u8::try_from(data.len()).map_err(|_| FrameError::PayloadTooLarge(data.len()))?;

    let mut buf = Vec::with_capacity(frame_len(data.len()));
    buf.push(magic);
    buf.push(command as u8);
    buf.push(len);
    buf.extend_from_slice(data);
    buf.push(checksum(&buf));
    Ok(buf)
}

/// Builds a zero-length link-control frame (ACK or NAK) without allocating.
pub fn control_frame(magic: u8, command: Command) -> [u8; MIN_FRAME_LEN] {
    let header = [magic, command as u8, 0x00];
    [header[0], header[1], header[2], checksum(&header)]
}

/// The data section of a complete, verified frame.
pub fn frame_payload(frame: &[u8]) -> &[u8] {
    if frame.len() < MIN_FRAME_LEN {
        return &[];
    }
    let declared = frame[LENGTH_OFFSET] as usize;
    let end = (HEADER_LEN + declared).min(frame.len() - CHECKSUM_LEN);
    &frame[HEADER_LEN..end]
}
