//! Wire format shared by the RCon client and the mock server.
//!
//! Nothing in this crate performs I/O: [`checksum`] implements the CRC-32
//! that guards every datagram and [`datagram`] turns requests and responses
//! into bytes and back.

pub mod checksum;
pub mod datagram;

pub use checksum::{checksum_bytes, crc32};
pub use datagram::{DatagramType, DecodeError, RawDatagram, Request, Response, MIN_DATAGRAM_LEN};

/// Default UDP port of a BattlEye RCon server.
pub const DEFAULT_RCON_PORT: u16 = 2302;

/// Largest datagram either side is expected to send.
pub const MAX_DATAGRAM_SIZE: usize = 4096;
