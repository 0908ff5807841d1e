//! Error types for vexflash.
//!
//! Failures are split by origin so callers can tell a bad input file from a
//! misbehaving device from a dead serial line:
//!
//! - [`HexFormatError`]: the HEX file is malformed or out of range. Raised
//!   before any byte is sent to the device.
//! - [`ProtocolError`]: a frame violated the packet protocol.
//! - [`TransportError`]: the serial link timed out or dropped bytes.

use std::io;
use thiserror::Error;

/// Result type for vexflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for vexflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Invalid HEX file.
    #[error("Invalid HEX file: {0}")]
    HexFormat(#[from] HexFormatError),

    /// Protocol violation in a received or outgoing frame.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A caller passed an argument the bootloader cannot accept.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No serial port could be found.
    #[error("Device not found")]
    DeviceNotFound,

    /// The embedding application asked to stop between commands.
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Whether this error came from the serial link rather than the data.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Io(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }

    /// Whether this error is a protocol (data-integrity) violation.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Whether this error was raised while building the program image.
    pub fn is_hex_format(&self) -> bool {
        matches!(self, Self::HexFormat(_))
    }
}

/// Problems with the Intel-HEX input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexFormatError {
    /// A line could not be parsed.
    #[error("line {line}: {reason}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A record's trailing checksum does not match its contents.
    #[error("line {line}: checksum verification failed: computed={computed:#04x}, expected={expected:#04x}")]
    ChecksumMismatch {
        /// 1-based line number.
        line: usize,
        /// Checksum computed from the record fields.
        computed: u8,
        /// Checksum stored in the file.
        expected: u8,
    },

    /// The end address lies below the start address (no data records).
    #[error("end address ({end:#06x}) is less than start address ({start:#06x})")]
    InvertedRange {
        /// Lowest data address.
        start: u32,
        /// One past the highest data address.
        end: u32,
    },

    /// The image falls outside writable program memory.
    #[error(
        "valid program addresses are {min:#08x} to {max:#08x}, image spans {start:#08x} to {end:#08x}",
        min = crate::image::hex::MIN_PROGRAM_ADDRESS,
        max = crate::image::hex::MAX_PROGRAM_ADDRESS
    )]
    OutOfRange {
        /// Lowest data address.
        start: u32,
        /// One past the highest data address.
        end: u32,
    },
}

/// Violations of the packet protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame checksum does not match its contents.
    #[error("checksum does not match data: calculated {computed:#04x}, received {received:#04x}")]
    ChecksumMismatch {
        /// Checksum computed from command, arguments and data.
        computed: u8,
        /// Checksum byte carried by the frame.
        received: u8,
    },

    /// The opcode is not part of the command set.
    #[error("unknown command opcode {0:#04x}")]
    UnknownCommand(u8),

    /// The frame is shorter than its layout requires.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum length for this frame.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },

    /// The frame exceeds the transport's size ceiling.
    #[error("frame of {length} bytes exceeds the maximum of {max}")]
    FrameTooLarge {
        /// Length of the offending frame.
        length: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A start or end delimiter is missing.
    #[error("missing frame delimiter: {0}")]
    MissingDelimiter(String),
}

/// Serial-link failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No byte arrived within the port timeout.
    #[error("timeout while reading from controller, response received so far: [{}]", hex_dump(.partial))]
    Timeout {
        /// Bytes of the frame accumulated before the timeout.
        partial: Vec<u8>,
    },

    /// The port accepted fewer bytes than the frame holds.
    #[error("error sending command: {expected} bytes to write, sent {sent}")]
    ShortWrite {
        /// Encoded frame length.
        expected: usize,
        /// Bytes the port accepted.
        sent: usize,
    },
}

/// Space-separated upper-case hex rendering used in diagnostics.
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x0F, 0x0F, 0x04]), "0F 0F 04");
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_timeout_message_includes_partial_frame() {
        let err = TransportError::Timeout {
            partial: vec![0x0F, 0x0F, 0x09],
        };
        assert!(err.to_string().contains("0F 0F 09"));
    }

    #[test]
    fn test_error_classification() {
        let transport: Error = TransportError::ShortWrite {
            expected: 10,
            sent: 3,
        }
        .into();
        assert!(transport.is_transport());
        assert!(!transport.is_protocol());

        let protocol: Error = ProtocolError::UnknownCommand(0x42).into();
        assert!(protocol.is_protocol());
        assert!(!protocol.is_transport());

        let hex: Error = HexFormatError::InvertedRange { start: 0x7FFD, end: 0 }.into();
        assert!(hex.is_hex_format());
    }

    #[test]
    fn test_out_of_range_message_names_bounds() {
        let err = HexFormatError::OutOfRange {
            start: 0x0700,
            end: 0x0900,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x000800"));
        assert!(msg.contains("0x007ffd"));
        assert!(msg.contains("0x000700"));
    }
}
