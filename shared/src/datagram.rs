//! Wire layout of BattlEye RCon datagrams.
//!
//! ```text
//! index:  0    1    2..6           6     7       8 ...
//!        'B'  'E'  CRC32 (LE)     0xFF  type    type-specific payload
//! ```
//!
//! The checksum covers every byte from index 6 (the `0xFF` separator) to the
//! end of the datagram. [`Request`] is what the client sends, [`Response`] is
//! what the server sends; both directions can be encoded and decoded so the
//! mock server and the client share one codec.

use crate::checksum::checksum_bytes;
use thiserror::Error;

pub const MAGIC: [u8; 2] = *b"BE";
pub const SEPARATOR: u8 = 0xFF;

pub const CHECKSUM_INDEX: usize = 2;
pub const SEPARATOR_INDEX: usize = 6;
pub const TYPE_INDEX: usize = 7;
pub const SEQUENCE_INDEX: usize = 8;
pub const LOGIN_RESULT_INDEX: usize = 8;
pub const MULTIPART_MARKER_INDEX: usize = 9;
pub const MULTIPART_TOTAL_INDEX: usize = 10;
pub const MULTIPART_INDEX_INDEX: usize = 11;
pub const MULTIPART_BODY_INDEX: usize = 12;

/// Header, type and sequence byte.
pub const MIN_DATAGRAM_LEN: usize = 9;

/// Type byte of the out-of-band shutdown signal sent by the test server.
pub const SHUTDOWN_SIGNAL_TYPE: u8 = 0xFF;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram too short: {len} bytes")]
    TooShort { len: usize },

    #[error("datagram does not start with the BE header")]
    BadHeader,

    #[error("checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("unknown datagram type {0:#04x}")]
    UnknownType(u8),

    #[error("truncated {0} datagram")]
    Truncated(DatagramType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DatagramType {
    Login = 0x00,
    Command = 0x01,
    Message = 0x02,
}

impl TryFrom<u8> for DatagramType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(DatagramType::Login),
            0x01 => Ok(DatagramType::Command),
            0x02 => Ok(DatagramType::Message),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

impl std::fmt::Display for DatagramType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DatagramType::Login => "login",
            DatagramType::Command => "command",
            DatagramType::Message => "message",
        };
        f.write_str(name)
    }
}

/// Client to server datagrams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Login { password: String },
    /// An empty `command` is a keep-alive.
    Command { sequence: u8, command: String },
    /// Receipt of a console message, echoing its sequence number.
    Acknowledge { sequence: u8 },
}

impl Request {
    pub fn datagram_type(&self) -> DatagramType {
        match self {
            Request::Login { .. } => DatagramType::Login,
            Request::Command { .. } => DatagramType::Command,
            Request::Acknowledge { .. } => DatagramType::Message,
        }
    }

    /// Whether the server answers this datagram.
    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::Acknowledge { .. })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = vec![SEPARATOR, self.datagram_type() as u8];
        match self {
            Request::Login { password } => payload.extend_from_slice(password.as_bytes()),
            Request::Command { sequence, command } => {
                payload.push(*sequence);
                payload.extend_from_slice(command.as_bytes());
            }
            Request::Acknowledge { sequence } => payload.push(*sequence),
        }
        frame(&payload)
    }

    /// Parses a datagram received from a client. Used by the test server.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let raw = RawDatagram::new(buf);
        raw.verify_checksum()?;
        let kind = DatagramType::try_from(buf[TYPE_INDEX])?;
        match kind {
            DatagramType::Login => Ok(Request::Login {
                password: lossy_text(&buf[TYPE_INDEX + 1..]),
            }),
            DatagramType::Command => {
                let sequence = raw.sequence().ok_or(DecodeError::Truncated(kind))?;
                Ok(Request::Command {
                    sequence,
                    command: lossy_text(&buf[SEQUENCE_INDEX + 1..]),
                })
            }
            DatagramType::Message => {
                let sequence = raw.sequence().ok_or(DecodeError::Truncated(kind))?;
                Ok(Request::Acknowledge { sequence })
            }
        }
    }
}

/// Server to client datagrams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Login {
        success: bool,
    },
    /// A complete response; `body` is empty for keep-alive acknowledgments.
    Command {
        sequence: u8,
        body: String,
    },
    /// One fragment of a multi-part command response.
    CommandPart {
        sequence: u8,
        total: u8,
        index: u8,
        body: Vec<u8>,
    },
    Message {
        sequence: u8,
        text: String,
    },
    /// Out-of-band signal the test server uses to end a session.
    Shutdown,
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = vec![SEPARATOR];
        match self {
            Response::Login { success } => {
                payload.push(DatagramType::Login as u8);
                payload.push(u8::from(*success));
            }
            Response::Command { sequence, body } => {
                payload.push(DatagramType::Command as u8);
                payload.push(*sequence);
                payload.extend_from_slice(body.as_bytes());
            }
            Response::CommandPart {
                sequence,
                total,
                index,
                body,
            } => {
                payload.push(DatagramType::Command as u8);
                payload.extend_from_slice(&[*sequence, 0x00, *total, *index]);
                payload.extend_from_slice(body);
            }
            Response::Message { sequence, text } => {
                payload.push(DatagramType::Message as u8);
                payload.push(*sequence);
                payload.extend_from_slice(text.as_bytes());
            }
            Response::Shutdown => payload.push(SHUTDOWN_SIGNAL_TYPE),
        }
        frame(&payload)
    }

    /// Parses a datagram received from the server.
    ///
    /// The checksum is verified before any field is interpreted. Datagrams
    /// shorter than [`MIN_DATAGRAM_LEN`] are rejected unless they carry the
    /// shutdown signal.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let raw = RawDatagram::new(buf);
        if raw.is_shutdown_signal() {
            return Ok(Response::Shutdown);
        }
        if !raw.has_valid_length() {
            return Err(DecodeError::TooShort { len: buf.len() });
        }
        raw.verify_checksum()?;

        let sequence = buf[SEQUENCE_INDEX];
        match DatagramType::try_from(buf[TYPE_INDEX])? {
            DatagramType::Login => Ok(Response::Login {
                success: buf[LOGIN_RESULT_INDEX] == 0x01,
            }),
            DatagramType::Command if raw.is_multipart() => {
                if buf.len() < MULTIPART_BODY_INDEX {
                    return Err(DecodeError::Truncated(DatagramType::Command));
                }
                Ok(Response::CommandPart {
                    sequence,
                    total: buf[MULTIPART_TOTAL_INDEX],
                    index: buf[MULTIPART_INDEX_INDEX],
                    body: buf[MULTIPART_BODY_INDEX..].to_vec(),
                })
            }
            DatagramType::Command => Ok(Response::Command {
                sequence,
                body: lossy_text(&buf[SEQUENCE_INDEX + 1..]),
            }),
            DatagramType::Message => Ok(Response::Message {
                sequence,
                text: lossy_text(&buf[SEQUENCE_INDEX + 1..]),
            }),
        }
    }
}

/// Read-only view over received bytes, for the checks that run before a
/// datagram is fully decoded.
#[derive(Debug, Clone, Copy)]
pub struct RawDatagram<'a> {
    buf: &'a [u8],
}

impl<'a> RawDatagram<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn type_byte(&self) -> Option<u8> {
        self.buf.get(TYPE_INDEX).copied()
    }

    pub fn datagram_type(&self) -> Option<DatagramType> {
        self.type_byte()
            .and_then(|byte| DatagramType::try_from(byte).ok())
    }

    pub fn sequence(&self) -> Option<u8> {
        self.buf.get(SEQUENCE_INDEX).copied()
    }

    /// A command response whose tenth byte is `0x00` is one part of a
    /// multi-part response.
    pub fn is_multipart(&self) -> bool {
        self.buf.get(MULTIPART_MARKER_INDEX) == Some(&0x00)
    }

    pub fn is_shutdown_signal(&self) -> bool {
        self.type_byte() == Some(SHUTDOWN_SIGNAL_TYPE)
    }

    pub fn has_valid_length(&self) -> bool {
        self.is_shutdown_signal() || self.buf.len() >= MIN_DATAGRAM_LEN
    }

    pub fn verify_checksum(&self) -> Result<(), DecodeError> {
        if self.buf.len() <= TYPE_INDEX {
            return Err(DecodeError::TooShort {
                len: self.buf.len(),
            });
        }
        if self.buf[..CHECKSUM_INDEX] != MAGIC || self.buf[SEPARATOR_INDEX] != SEPARATOR {
            return Err(DecodeError::BadHeader);
        }

        let mut stored = [0u8; 4];
        stored.copy_from_slice(&self.buf[CHECKSUM_INDEX..SEPARATOR_INDEX]);
        let computed = checksum_bytes(&self.buf[SEPARATOR_INDEX..]);
        if stored != computed {
            return Err(DecodeError::ChecksumMismatch {
                expected: u32::from_le_bytes(stored),
                actual: u32::from_le_bytes(computed),
            });
        }
        Ok(())
    }
}

/// Prepends magic and checksum to a payload that starts at the separator.
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SEPARATOR_INDEX + payload.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&checksum_bytes(payload));
    buf.extend_from_slice(payload);
    buf
}

fn lossy_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acknowledge_encoding_matches_capture() {
        let bytes = Request::Acknowledge { sequence: 0 }.encode();
        assert_eq!(
            bytes,
            vec![0x42, 0x45, 0x7D, 0x8F, 0xEF, 0x73, 0xFF, 0x02, 0x00]
        );
    }

    #[test]
    fn test_login_request_layout() {
        let bytes = Request::Login {
            password: "password".to_string(),
        }
        .encode();

        assert_eq!(&bytes[..2], b"BE");
        assert_eq!(&bytes[2..6], &[0xDE, 0x26, 0x2D, 0x52]);
        assert_eq!(bytes[6], 0xFF);
        assert_eq!(bytes[7], 0x00);
        assert_eq!(&bytes[8..], b"password");
    }

    #[test]
    fn test_command_request_roundtrip() {
        for (sequence, command) in [(0u8, "players"), (255, "say -1 hello"), (17, "")] {
            let request = Request::Command {
                sequence,
                command: command.to_string(),
            };
            let decoded = Request::decode(&request.encode()).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn test_expects_response() {
        assert!(Request::Login {
            password: String::new()
        }
        .expects_response());
        assert!(Request::Command {
            sequence: 1,
            command: String::new()
        }
        .expects_response());
        assert!(!Request::Acknowledge { sequence: 1 }.expects_response());
    }

    #[test]
    fn test_login_response_decode() {
        let ok = Response::Login { success: true }.encode();
        let rejected = Response::Login { success: false }.encode();
        assert_eq!(ok.len(), 9);
        assert_eq!(
            Response::decode(&ok).unwrap(),
            Response::Login { success: true }
        );
        assert_eq!(
            Response::decode(&rejected).unwrap(),
            Response::Login { success: false }
        );
    }

    #[test]
    fn test_empty_command_response() {
        let bytes = Response::Command {
            sequence: 3,
            body: String::new(),
        }
        .encode();
        assert_eq!(bytes.len(), MIN_DATAGRAM_LEN);

        match Response::decode(&bytes).unwrap() {
            Response::Command { sequence, body } => {
                assert_eq!(sequence, 3);
                assert!(body.is_empty());
            }
            other => panic!("unexpected datagram: {:?}", other),
        }
    }

    #[test]
    fn test_multipart_header_decode() {
        let bytes = Response::CommandPart {
            sequence: 9,
            total: 3,
            index: 2,
            body: b"tail".to_vec(),
        }
        .encode();
        assert_eq!(&bytes[8..12], &[9, 0x00, 3, 2]);

        match Response::decode(&bytes).unwrap() {
            Response::CommandPart {
                sequence,
                total,
                index,
                body,
            } => {
                assert_eq!((sequence, total, index), (9, 3, 2));
                assert_eq!(body, b"tail");
            }
            other => panic!("unexpected datagram: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_multipart_header() {
        let mut payload = vec![SEPARATOR, 0x01, 4, 0x00, 2];
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&checksum_bytes(&payload));
        bytes.append(&mut payload);

        assert_eq!(
            Response::decode(&bytes),
            Err(DecodeError::Truncated(DatagramType::Command))
        );
    }

    #[test]
    fn test_console_message_decode() {
        let bytes = Response::Message {
            sequence: 42,
            text: "Player #1 connected".to_string(),
        }
        .encode();

        assert_eq!(
            Response::decode(&bytes).unwrap(),
            Response::Message {
                sequence: 42,
                text: "Player #1 connected".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_short_datagram() {
        let bytes = Response::Login { success: true }.encode();
        assert_eq!(
            Response::decode(&bytes[..8]),
            Err(DecodeError::TooShort { len: 8 })
        );
        assert_eq!(
            Response::decode(&[]),
            Err(DecodeError::TooShort { len: 0 })
        );
    }

    #[test]
    fn test_rejects_corrupted_checksum() {
        let mut bytes = Response::Message {
            sequence: 1,
            text: "hello".to_string(),
        }
        .encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x20;

        assert!(matches!(
            Response::decode(&bytes),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut bytes = Response::Login { success: true }.encode();
        bytes[0] = b'X';
        assert_eq!(Response::decode(&bytes), Err(DecodeError::BadHeader));
    }

    #[test]
    fn test_unknown_type() {
        let mut payload = vec![SEPARATOR, 0x07, 0x00];
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&checksum_bytes(&payload));
        bytes.append(&mut payload);

        assert_eq!(Response::decode(&bytes), Err(DecodeError::UnknownType(0x07)));
    }

    #[test]
    fn test_shutdown_signal() {
        let bytes = Response::Shutdown.encode();
        let raw = RawDatagram::new(&bytes);

        assert_eq!(bytes.len(), 8);
        assert!(raw.is_shutdown_signal());
        assert!(raw.has_valid_length());
        assert_eq!(Response::decode(&bytes).unwrap(), Response::Shutdown);
    }

    #[test]
    fn test_raw_view() {
        let part = Response::CommandPart {
            sequence: 5,
            total: 2,
            index: 0,
            body: vec![],
        }
        .encode();
        let raw = RawDatagram::new(&part);
        assert_eq!(raw.datagram_type(), Some(DatagramType::Command));
        assert_eq!(raw.sequence(), Some(5));
        assert!(raw.is_multipart());
        assert!(raw.verify_checksum().is_ok());

        let single = Response::Command {
            sequence: 5,
            body: "x".to_string(),
        }
        .encode();
        assert!(!RawDatagram::new(&single).is_multipart());
    }

    #[test]
    fn test_lossy_body_decoding() {
        let mut payload = vec![SEPARATOR, 0x02, 0x01, b'o', b'k', 0xC3];
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&checksum_bytes(&payload));
        bytes.append(&mut payload);

        match Response::decode(&bytes).unwrap() {
            Response::Message { text, .. } => assert_eq!(text, "ok\u{FFFD}"),
            other => panic!("unexpected datagram: {:?}", other),
        }
    }
}
