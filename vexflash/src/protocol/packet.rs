//! Bootloader packet format.
//!
//! ## Frame Format
//!
//! ```text
//! +-----+-----+--------+-----------+-----------+----------+-----+
//! | STX | STX | Opcode | Arguments |   Data    | Checksum | ETX |
//! +-----+-----+--------+-----------+-----------+----------+-----+
//! |  1  |  1  |   1    |     N     |  M (opt)  |    1     |  1  |
//! +-----+-----+--------+-----------+-----------+----------+-----+
//! ```
//!
//! Every byte between the delimiters that equals `STX`, `ETX` or `ESC` is
//! preceded by an `ESC` byte on the wire. The checksum is the two's
//! complement of the byte sum of opcode, arguments and data, so the whole
//! unescaped payload sums to zero.

use crate::error::ProtocolError;
use byteorder::{LittleEndian, WriteBytesExt};
use std::fmt;

/// Start-of-frame byte (sent twice).
pub const STX: u8 = 0x0F;

/// End-of-frame byte.
pub const ETX: u8 = 0x04;

/// Escape byte.
pub const ESC: u8 = 0x05;

/// Reply terminator for [`Command::ReturnToUserCode`].
pub const RESUME_TERMINATOR: u8 = 0x40;

/// Hard ceiling on an encoded frame, delimiters included.
pub const MAX_PACKET_LENGTH: usize = 255;

/// Shortest frame the decoder accepts: two STX, opcode, four argument
/// bytes, checksum and ETX.
pub const MIN_RESPONSE_LENGTH: usize = 9;

/// Bootloader commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Command {
    /// Read program memory (0x01).
    ReadProgramMemory = 0x01,
    /// Write program memory (0x02).
    WriteProgramMemory = 0x02,
    /// Leave the bootloader and run the user program (0x08).
    ReturnToUserCode = 0x08,
    /// Erase program memory (0x09).
    EraseProgramMemory = 0x09,
}

impl Command {
    /// Opcode byte.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Number of argument bytes in a request for this command.
    pub fn argument_len(self) -> usize {
        match self {
            Self::EraseProgramMemory => 5,
            Self::WriteProgramMemory | Self::ReadProgramMemory => 4,
            Self::ReturnToUserCode => 1,
        }
    }

    /// Byte that terminates the device's reply to this command.
    pub fn response_terminator(self) -> u8 {
        match self {
            Self::ReturnToUserCode => RESUME_TERMINATOR,
            _ => ETX,
        }
    }

    /// Whether the reply carries a structured packet rather than a bare
    /// acknowledgment.
    pub fn has_structured_reply(self) -> bool {
        matches!(self, Self::ReadProgramMemory)
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::ReadProgramMemory),
            0x02 => Ok(Self::WriteProgramMemory),
            0x08 => Ok(Self::ReturnToUserCode),
            0x09 => Ok(Self::EraseProgramMemory),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadProgramMemory => write!(f, "ReadProgramMemory"),
            Self::WriteProgramMemory => write!(f, "WriteProgramMemory"),
            Self::ReturnToUserCode => write!(f, "ReturnToUserCode"),
            Self::EraseProgramMemory => write!(f, "EraseProgramMemory"),
        }
    }
}

/// Checksum over opcode, arguments and data.
pub fn checksum(command: Command, arguments: &[u8], data: &[u8]) -> u8 {
    arguments
        .iter()
        .chain(data)
        .fold(command.value(), |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

fn needs_escape(byte: u8) -> bool {
    matches!(byte, STX | ETX | ESC)
}

/// Byte-stuff a payload.
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() * 2);
    for &b in payload {
        if needs_escape(b) {
            out.push(ESC);
        }
        out.push(b);
    }
    out
}

/// Undo [`escape`]: every `ESC` makes the following byte literal.
pub fn unescape(stuffed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(stuffed.len());
    let mut escaped = false;
    for &b in stuffed {
        if !escaped && b == ESC {
            escaped = true;
        } else {
            out.push(b);
            escaped = false;
        }
    }
    out
}

/// A logical protocol message.
///
/// The checksum is never stored; it is derived from the other fields on
/// demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    command: Command,
    arguments: Vec<u8>,
    data: Option<Vec<u8>>,
}

impl Packet {
    /// Create a packet from its parts.
    pub fn new(command: Command, arguments: Vec<u8>, data: Option<Vec<u8>>) -> Self {
        Self {
            command,
            arguments,
            data,
        }
    }

    /// Erase `rows` 64-byte rows starting at `address`.
    pub fn erase(rows: u8, address: u32) -> Self {
        let mut arguments = vec![rows];
        push_address(&mut arguments, address);
        arguments.push(0);
        Self::new(Command::EraseProgramMemory, arguments, None)
    }

    /// Write `blocks` 8-byte blocks of `data` starting at `address`.
    pub fn write(blocks: u8, address: u32, data: Vec<u8>) -> Self {
        let mut arguments = vec![blocks];
        push_address(&mut arguments, address);
        Self::new(Command::WriteProgramMemory, arguments, Some(data))
    }

    /// Read `length` bytes starting at `address`.
    pub fn read(length: u8, address: u32) -> Self {
        let mut arguments = vec![length];
        push_address(&mut arguments, address);
        Self::new(Command::ReadProgramMemory, arguments, None)
    }

    /// Leave the bootloader.
    pub fn return_to_user_code() -> Self {
        Self::new(Command::ReturnToUserCode, vec![RESUME_TERMINATOR], None)
    }

    /// Command opcode.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Argument bytes.
    pub fn arguments(&self) -> &[u8] {
        &self.arguments
    }

    /// Data bytes, if any.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Consume the packet and return its data.
    pub fn into_data(self) -> Option<Vec<u8>> {
        self.data
    }

    /// Checksum of the current field values.
    pub fn checksum(&self) -> u8 {
        checksum(
            self.command,
            &self.arguments,
            self.data.as_deref().unwrap_or_default(),
        )
    }

    /// Build the escaped wire frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut payload = Vec::with_capacity(
            2 + self.arguments.len() + self.data.as_ref().map_or(0, Vec::len),
        );
        payload.push(self.command.value());
        payload.extend_from_slice(&self.arguments);
        if let Some(data) = &self.data {
            payload.extend_from_slice(data);
        }
        payload.push(self.checksum());

        let stuffed = escape(&payload);
        let mut frame = Vec::with_capacity(stuffed.len() + 3);
        frame.push(STX);
        frame.push(STX);
        frame.extend_from_slice(&stuffed);
        frame.push(ETX);

        if frame.len() > MAX_PACKET_LENGTH {
            return Err(ProtocolError::FrameTooLarge {
                length: frame.len(),
                max: MAX_PACKET_LENGTH,
            });
        }

        Ok(frame)
    }

    /// Parse an already unescaped frame (as returned by the frame reader).
    ///
    /// This decodes device replies, not arbitrary requests. Every frame must
    /// be at least [`MIN_RESPONSE_LENGTH`] bytes, so the 6-byte resume request
    /// is rejected. A read frame is taken to carry the data its length
    /// argument announces, so a read request (which has none) is truncated.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let len = frame.len();
        if len < MIN_RESPONSE_LENGTH {
            return Err(ProtocolError::Truncated {
                expected: MIN_RESPONSE_LENGTH,
                actual: len,
            });
        }
        if frame[0] != STX || frame[1] != STX {
            return Err(ProtocolError::MissingDelimiter(format!(
                "packet did not begin with two STX bytes, instead it had {:02X} {:02X}",
                frame[0], frame[1]
            )));
        }
        if frame[len - 1] != ETX {
            return Err(ProtocolError::MissingDelimiter(format!(
                "packet did not end with an ETX byte, instead it had {:02X}",
                frame[len - 1]
            )));
        }

        let received = frame[len - 2];
        let command = Command::try_from(frame[2])?;
        let body = &frame[3..len - 2];

        let (arguments, data) = if command == Command::ReadProgramMemory {
            let data_len = usize::from(body[0]);
            let expected = MIN_RESPONSE_LENGTH + data_len;
            if len < expected {
                return Err(ProtocolError::Truncated {
                    expected,
                    actual: len,
                });
            }
            (body[..4].to_vec(), Some(body[4..4 + data_len].to_vec()))
        } else {
            let split = command.argument_len().min(body.len());
            let (arguments, rest) = body.split_at(split);
            let data = (!rest.is_empty()).then(|| rest.to_vec());
            (arguments.to_vec(), data)
        };

        let packet = Self::new(command, arguments, data);
        let computed = packet.checksum();
        if computed != received {
            return Err(ProtocolError::ChecksumMismatch { computed, received });
        }

        Ok(packet)
    }
}

/// Append a 24-bit little-endian address.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
fn push_address(buf: &mut Vec<u8>, address: u32) {
    buf.write_u24::<LittleEndian>(address & 0x00FF_FFFF)
        .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an unescaped read reply.
    fn read_reply(address: u32, data: &[u8]) -> Vec<u8> {
        let request = Packet::read(u8::try_from(data.len()).unwrap(), address);
        let sum = checksum(Command::ReadProgramMemory, request.arguments(), data);
        let mut frame = vec![STX, STX, Command::ReadProgramMemory.value()];
        frame.extend_from_slice(request.arguments());
        frame.extend_from_slice(data);
        frame.push(sum);
        frame.push(ETX);
        frame
    }

    #[test]
    fn test_command_values() {
        assert_eq!(Command::EraseProgramMemory.value(), 0x09);
        assert_eq!(Command::WriteProgramMemory.value(), 0x02);
        assert_eq!(Command::ReadProgramMemory.value(), 0x01);
        assert_eq!(Command::ReturnToUserCode.value(), 0x08);
    }

    #[test]
    fn test_command_from_unknown_opcode() {
        assert_eq!(
            Command::try_from(0x03),
            Err(ProtocolError::UnknownCommand(0x03))
        );
        assert_eq!(Command::try_from(0x09), Ok(Command::EraseProgramMemory));
    }

    #[test]
    fn test_checksum_formula() {
        // -(0x09 + 2 + 0x00 + 0x08 + 0x00 + 0x00) = -0x13 = 0xED
        let packet = Packet::erase(2, 0x0800);
        assert_eq!(packet.arguments(), &[2, 0x00, 0x08, 0x00, 0x00]);
        assert_eq!(packet.checksum(), 0xED);
    }

    #[test]
    fn test_checksum_follows_field_values() {
        let a = Packet::new(Command::WriteProgramMemory, vec![1, 0, 8, 0], Some(vec![0x10; 8]));
        let b = Packet::new(Command::WriteProgramMemory, vec![1, 0, 8, 0], Some(vec![0x11; 8]));
        assert_eq!(a.checksum().wrapping_sub(b.checksum()), 8);
    }

    #[test]
    fn test_payload_sums_to_zero() {
        let packet = Packet::write(2, 0x0A40, (0u8..16).collect());
        let sum = packet
            .arguments()
            .iter()
            .chain(packet.data().unwrap())
            .fold(packet.command().value(), |acc, &b| acc.wrapping_add(b))
            .wrapping_add(packet.checksum());
        assert_eq!(sum, 0);
    }

    #[test]
    fn test_encode_erase() {
        let frame = Packet::erase(2, 0x0800).encode().unwrap();
        assert_eq!(
            frame,
            vec![STX, STX, 0x09, 0x02, 0x00, 0x08, 0x00, 0x00, 0xED, ETX]
        );
    }

    #[test]
    fn test_encode_return_to_user_code() {
        let frame = Packet::return_to_user_code().encode().unwrap();
        assert_eq!(frame, vec![STX, STX, 0x08, 0x40, 0xB8, ETX]);
    }

    #[test]
    fn test_encode_escapes_payload_only() {
        let packet = Packet::write(1, 0x0800, vec![STX, ETX, ESC, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let frame = packet.encode().unwrap();

        assert_eq!(&frame[..2], &[STX, STX]);
        assert_eq!(frame[frame.len() - 1], ETX);
        let inner = &frame[2..frame.len() - 1];
        assert_eq!(&inner[5..11], &[ESC, STX, ESC, ETX, ESC, ESC]);
        assert_eq!(unescape(inner)[5..8], [STX, ETX, ESC]);
    }

    #[test]
    fn test_escape_leaves_no_bare_delimiters() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let stuffed = escape(&payload);
        let mut i = 0;
        while i < stuffed.len() {
            if stuffed[i] == ESC {
                assert!(needs_escape(stuffed[i + 1]));
                i += 2;
            } else {
                assert!(!needs_escape(stuffed[i]));
                i += 1;
            }
        }
        assert_eq!(unescape(&stuffed), payload);
    }

    #[test]
    fn test_unescape_of_escaped_escape() {
        assert_eq!(unescape(&[ESC, ESC, 0x45, ESC, ETX]), vec![ESC, 0x45, ETX]);
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let packet = Packet::write(32, 0x0800, vec![0x00; 256]);
        let err = packet.encode().unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 255, .. }));
    }

    #[test]
    fn test_full_cluster_fits_even_when_every_byte_is_escaped() {
        let packet = Packet::write(8, 0x0800, vec![ESC; 64]);
        assert!(packet.encode().is_ok());
    }

    #[test]
    fn test_roundtrip_write_and_erase() {
        for packet in [
            Packet::erase(128, 0x0800),
            Packet::erase(29, 0x2800),
            Packet::write(8, 0x0840, (0u8..64).collect()),
            Packet::write(1, 0x0F08, vec![STX, ETX, ESC, 0xFF, 0x00, 0x01, 0x02, 0x03]),
        ] {
            let frame = packet.encode().unwrap();
            let frame = unescape(&frame);
            let decoded = Packet::decode(&frame).unwrap();
            assert_eq!(decoded.command(), packet.command());
            assert_eq!(decoded.arguments(), packet.arguments());
            assert_eq!(decoded.data(), packet.data());
            assert_eq!(decoded.checksum(), packet.checksum());
        }
    }

    #[test]
    fn test_requests_without_reply_layout_do_not_decode() {
        let resume = Packet::return_to_user_code().encode().unwrap();
        assert_eq!(
            Packet::decode(&unescape(&resume)).unwrap_err(),
            ProtocolError::Truncated {
                expected: 9,
                actual: 6
            }
        );

        let read = Packet::read(5, 0x0800).encode().unwrap();
        assert_eq!(
            Packet::decode(&unescape(&read)).unwrap_err(),
            ProtocolError::Truncated {
                expected: 14,
                actual: 9
            }
        );
    }

    #[test]
    fn test_decode_read_reply() {
        let data = [0xFF, 0xEF, 0x45, 0x65, 0x34];
        let frame = read_reply(0x030F06, &data);
        let packet = Packet::decode(&frame).unwrap();
        assert_eq!(packet.command(), Command::ReadProgramMemory);
        assert_eq!(packet.arguments(), &[5, 0x06, 0x0F, 0x03]);
        assert_eq!(packet.data(), Some(&data[..]));
    }

    #[test]
    fn test_decode_read_reply_truncated() {
        let mut frame = read_reply(0x0800, &[1, 2, 3, 4, 5]);
        // Claim more data than the frame holds.
        frame[3] = 10;
        let err = Packet::decode(&frame).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                expected: 19,
                actual: 14
            }
        );
    }

    #[test]
    fn test_decode_too_short() {
        let err = Packet::decode(&[STX, STX, ETX]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                expected: 9,
                actual: 3
            }
        );
    }

    #[test]
    fn test_decode_missing_delimiters() {
        let mut frame = read_reply(0x0800, &[1, 2]);
        frame[1] = 0x00;
        assert!(matches!(
            Packet::decode(&frame),
            Err(ProtocolError::MissingDelimiter(_))
        ));

        let mut frame = read_reply(0x0800, &[1, 2]);
        let last = frame.len() - 1;
        frame[last] = 0x00;
        assert!(matches!(
            Packet::decode(&frame),
            Err(ProtocolError::MissingDelimiter(_))
        ));
    }

    #[test]
    fn test_decode_unknown_command() {
        let mut frame = read_reply(0x0800, &[1, 2]);
        frame[2] = 0x7E;
        assert_eq!(
            Packet::decode(&frame),
            Err(ProtocolError::UnknownCommand(0x7E))
        );
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut frame = read_reply(0x0800, &[1, 2, 3]);
        frame[8] ^= 0x01;
        assert!(matches!(
            Packet::decode(&frame),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }
}
