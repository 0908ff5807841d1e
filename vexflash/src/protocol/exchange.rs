//! One request/reply turn on the serial line.

use crate::error::{Error, ProtocolError, Result, TransportError, hex_dump};
use crate::protocol::frame::FrameReader;
use crate::protocol::packet::{ETX, Packet, STX};
use log::{debug, trace};
use std::io::{ErrorKind, Read, Write};

/// What the device sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Bare acknowledgment frame (erase, write, resume).
    Ack(Vec<u8>),
    /// Decoded packet (read).
    Packet(Packet),
}

impl Reply {
    /// The decoded packet, if this reply carried one.
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Self::Packet(packet) => Some(packet),
            Self::Ack(_) => None,
        }
    }
}

/// Send `packet` and wait for the reply ending in `terminator`.
///
/// The whole frame is written and flushed before reading starts. Nothing
/// is retried: any failure is returned to the caller unchanged.
pub fn send_command<P: Read + Write + ?Sized>(
    port: &mut P,
    packet: &Packet,
    terminator: u8,
) -> Result<Reply> {
    debug!(
        "send_command(): command={}, arguments=[{}], data={}",
        packet.command(),
        hex_dump(packet.arguments()),
        packet
            .data()
            .map_or_else(|| "None".to_string(), |d| format!("{} bytes", d.len()))
    );

    let frame = packet.encode()?;
    trace!("send_command(): frame=[{}]", hex_dump(&frame));

    let sent = write_frame(port, &frame)?;
    port.flush()?;
    if sent != frame.len() {
        return Err(TransportError::ShortWrite {
            expected: frame.len(),
            sent,
        }
        .into());
    }

    let response = FrameReader::new(terminator).read_frame(port)?;

    if packet.command().has_structured_reply() {
        return Ok(Reply::Packet(Packet::decode(&response)?));
    }

    if terminator == ETX && !response.starts_with(&[STX, STX]) {
        return Err(ProtocolError::MissingDelimiter(format!(
            "acknowledgment did not begin with two STX bytes: [{}]",
            hex_dump(&response)
        ))
        .into());
    }

    Ok(Reply::Ack(response))
}

/// Write until the port stops accepting bytes; returns the count written.
fn write_frame<P: Write + ?Sized>(port: &mut P, frame: &[u8]) -> Result<usize> {
    let mut sent = 0;
    while sent < frame.len() {
        match port.write(&frame[sent..]) {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(sent)
}
