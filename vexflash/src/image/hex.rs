//! Intel-HEX parsing into a contiguous program image.
//!
//! The compiler emits one record per line:
//!
//! ```text
//! +---+--------+---------+------+----------------+----------+
//! | : | Length | Address | Type |      Data      | Checksum |
//! +---+--------+---------+------+----------------+----------+
//! | 1 |  2 hex |  4 hex  | 2 hex| Length * 2 hex |   2 hex  |
//! +---+--------+---------+------+----------------+----------+
//! ```
//!
//! Records whose address field is zero are structural (end of file,
//! extended address) and carry no program bytes. Everything else is copied
//! into a buffer that starts out fully erased (`0xFF`).

use crate::error::{Error, HexFormatError, Result};
use log::debug;
use std::fs;
use std::path::Path;

/// Lowest writable program memory address.
pub const MIN_PROGRAM_ADDRESS: u32 = 0x0800;

/// Highest writable program memory address.
pub const MAX_PROGRAM_ADDRESS: u32 = 0x7FFD;

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// `:` + length + address + type.
const HEADER_CHARS: usize = 9;

/// Header plus the two checksum characters.
const MIN_RECORD_CHARS: usize = HEADER_CHARS + 2;

/// Half-open address span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressRange {
    /// First address.
    pub start: u32,
    /// One past the last address.
    pub end: u32,
}

impl AddressRange {
    /// Number of bytes in the span.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    /// Whether the span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether the span lies inside writable program memory.
    pub fn is_within_program_memory(&self) -> bool {
        self.start >= MIN_PROGRAM_ADDRESS && self.end <= MAX_PROGRAM_ADDRESS
    }
}

/// One parsed line of a HEX file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Program-space address, zero for structural records.
    pub address: u32,
    /// Declared data length.
    pub length: u8,
    /// Data bytes (empty for structural records).
    pub data: Vec<u8>,
    /// Checksum stored at the end of the line.
    pub checksum: u8,
}

impl HexRecord {
    /// Parse a single line. `line_no` is 1-based and only used in errors.
    pub fn parse(line: &str, line_no: usize) -> std::result::Result<Self, HexFormatError> {
        let malformed = |reason: &str| HexFormatError::Malformed {
            line: line_no,
            reason: reason.to_string(),
        };

        let line = line.trim();
        if !line.is_ascii() {
            return Err(malformed("non-ASCII characters"));
        }
        if !line.starts_with(':') {
            return Err(malformed("record does not start with ':'"));
        }
        if line.len() < MIN_RECORD_CHARS {
            return Err(malformed("record is too short"));
        }

        let length = hex_byte(&line[1..3]).ok_or_else(|| malformed("invalid length field"))?;
        let address = hex_address(&line[3..7]).ok_or_else(|| malformed("invalid address field"))?;
        // The type field is not interpreted, only checked.
        hex_byte(&line[7..9]).ok_or_else(|| malformed("invalid record type field"))?;
        let checksum = hex_byte(&line[line.len() - 2..])
            .ok_or_else(|| malformed("invalid checksum field"))?;

        if address == 0 {
            return Ok(Self {
                address,
                length,
                data: Vec::new(),
                checksum,
            });
        }

        let data_end = HEADER_CHARS + usize::from(length) * 2;
        if line.len() < data_end + 2 {
            return Err(malformed(&format!(
                "record declares {length} data bytes but the line is too short"
            )));
        }

        let data = (HEADER_CHARS..data_end)
            .step_by(2)
            .map(|pos| hex_byte(&line[pos..pos + 2]))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| malformed("invalid data byte"))?;

        Ok(Self {
            address,
            length,
            data,
            checksum,
        })
    }

    /// Structural records (address field zero) carry no program bytes.
    pub fn is_sentinel(&self) -> bool {
        self.address == 0
    }

    /// One past the last address this record writes.
    pub fn end_address(&self) -> u32 {
        self.address + u32::from(self.length)
    }

    /// Checksum derived from the record's own fields.
    #[allow(clippy::cast_possible_truncation)]
    pub fn computed_checksum(&self) -> u8 {
        let sum = self
            .data
            .iter()
            .fold(self.length, |acc, &b| acc.wrapping_add(b))
            .wrapping_add(self.address as u8)
            .wrapping_add((self.address >> 8) as u8);
        sum.wrapping_neg()
    }

    /// Compare the stored checksum against the computed one.
    pub fn verify(&self, line_no: usize) -> std::result::Result<(), HexFormatError> {
        let computed = self.computed_checksum();
        if computed == self.checksum {
            Ok(())
        } else {
            Err(HexFormatError::ChecksumMismatch {
                line: line_no,
                computed,
                expected: self.checksum,
            })
        }
    }
}

fn is_hex_field(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// `from_str_radix` tolerates a leading `+`; record fields are digits only.
fn hex_byte(s: &str) -> Option<u8> {
    is_hex_field(s)
        .then(|| u8::from_str_radix(s, 16).ok())
        .flatten()
}

fn hex_address(s: &str) -> Option<u32> {
    is_hex_field(s)
        .then(|| u32::from_str_radix(s, 16).ok())
        .flatten()
}

/// Non-blank lines with their 1-based line numbers.
fn record_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

/// A contiguous binary reconstruction of the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    range: AddressRange,
    bytes: Vec<u8>,
}

impl ProgramImage {
    /// Build an image from HEX text.
    ///
    /// The text is walked twice: the first pass establishes the address span
    /// and checks it against program memory, the second verifies every
    /// record checksum and copies the data in. Any failure discards the
    /// whole image.
    pub fn parse(text: &str) -> std::result::Result<Self, HexFormatError> {
        let range = Self::scan_range(text)?;
        debug!(
            "Start address: {:#06x}, End address: {:#06x}",
            range.start, range.end
        );

        if range.end < range.start {
            return Err(HexFormatError::InvertedRange {
                start: range.start,
                end: range.end,
            });
        }
        if !range.is_within_program_memory() {
            return Err(HexFormatError::OutOfRange {
                start: range.start,
                end: range.end,
            });
        }

        let mut bytes = vec![ERASED_BYTE; range.len()];

        for (line_no, line) in record_lines(text) {
            let record = HexRecord::parse(line, line_no)?;
            if record.is_sentinel() {
                continue;
            }
            record.verify(line_no)?;

            let offset = (record.address - range.start) as usize;
            bytes[offset..offset + record.data.len()].copy_from_slice(&record.data);
        }

        Ok(Self { range, bytes })
    }

    /// Read and parse a HEX file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::parse(&text).map_err(Error::from)
    }

    /// First pass: lowest data address and one past the highest.
    fn scan_range(text: &str) -> std::result::Result<AddressRange, HexFormatError> {
        let mut range = AddressRange {
            start: MAX_PROGRAM_ADDRESS,
            end: 0,
        };

        for (line_no, line) in record_lines(text) {
            let record = HexRecord::parse(line, line_no)?;
            if record.is_sentinel() {
                continue;
            }
            range.start = range.start.min(record.address);
            range.end = range.end.max(record.end_address());
        }

        Ok(range)
    }

    /// Address span covered by the image.
    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// First address.
    pub fn start_address(&self) -> u32 {
        self.range.start
    }

    /// One past the last address.
    pub fn end_address(&self) -> u32 {
        self.range.end
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of 64-byte rows the upload will erase.
    pub fn erase_rows(&self) -> usize {
        self.len().div_ceil(crate::plan::ERASE_ROW_SIZE)
    }

    /// Number of write commands the upload will issue.
    pub fn write_clusters(&self) -> usize {
        crate::plan::plan_write(self.start_address(), &self.bytes).len()
    }
}
