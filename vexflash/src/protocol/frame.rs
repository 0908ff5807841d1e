//! Reading reply frames off the serial line.

use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::protocol::packet::{ESC, ETX};
use log::trace;
use std::io::{ErrorKind, Read};

/// Upper bound on an unterminated reply before giving up.
pub const MAX_RESPONSE_LENGTH: usize = 4096;

/// Byte-at-a-time frame reader.
///
/// Escape bytes are dropped as they arrive, so the returned frame is
/// already unescaped. The frame ends at the first terminator byte that is
/// not itself escaped.
#[derive(Debug, Clone, Copy)]
pub struct FrameReader {
    terminator: u8,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(ETX)
    }
}

impl FrameReader {
    /// Create a reader that stops at `terminator`.
    pub fn new(terminator: u8) -> Self {
        Self { terminator }
    }

    /// Terminator this reader waits for.
    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    /// Read one frame.
    ///
    /// Each read blocks for at most the port's timeout. A read that yields
    /// nothing fails with [`TransportError::Timeout`] carrying the bytes
    /// received so far.
    pub fn read_frame<R: Read + ?Sized>(&self, reader: &mut R) -> Result<Vec<u8>> {
        trace!("read_frame(): terminator={:#04x}", self.terminator);

        let mut frame = Vec::new();
        let mut escaped = false;
        let mut buf = [0u8; 1];

        loop {
            let n = match reader.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::TimedOut => 0,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            };
            if n == 0 {
                return Err(TransportError::Timeout { partial: frame }.into());
            }

            let byte = buf[0];
            if !escaped && byte == ESC {
                escaped = true;
                continue;
            }

            frame.push(byte);
            if !escaped && byte == self.terminator {
                break;
            }
            escaped = false;

            if frame.len() > MAX_RESPONSE_LENGTH {
                return Err(ProtocolError::FrameTooLarge {
                    length: frame.len(),
                    max: MAX_RESPONSE_LENGTH,
                }
                .into());
            }
        }

        trace!("read_frame(): {}", crate::error::hex_dump(&frame));
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{RESUME_TERMINATOR, STX};
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Returns queued bytes, then reports a serial timeout.
    struct TimeoutReader {
        data: VecDeque<u8>,
    }

    impl Read for TimeoutReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.data.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                },
                None => Err(std::io::Error::new(ErrorKind::TimedOut, "no data")),
            }
        }
    }

    #[test]
    fn test_read_plain_frame() {
        let mut input = Cursor::new(vec![STX, STX, ETX]);
        let frame = FrameReader::default().read_frame(&mut input).unwrap();
        assert_eq!(frame, vec![STX, STX, ETX]);
    }

    #[test]
    fn test_read_frame_with_escapes() {
        let mut input = Cursor::new(vec![STX, STX, ESC, ESC, 0x45, ESC, ETX, ETX]);
        let frame = FrameReader::default().read_frame(&mut input).unwrap();
        assert_eq!(frame, vec![STX, STX, ESC, 0x45, ETX, ETX]);
    }

    #[test]
    fn test_read_stops_at_first_terminator() {
        let mut input = Cursor::new(vec![STX, STX, ETX, 0x99, 0x98]);
        let frame = FrameReader::default().read_frame(&mut input).unwrap();
        assert_eq!(frame, vec![STX, STX, ETX]);
        assert_eq!(input.position(), 3);
    }

    #[test]
    fn test_custom_terminator() {
        let mut input = Cursor::new(b"IFI>\x04@".to_vec());
        let frame = FrameReader::new(RESUME_TERMINATOR)
            .read_frame(&mut input)
            .unwrap();
        assert_eq!(frame, b"IFI>\x04@".to_vec());
    }

    #[test]
    fn test_eof_is_timeout_with_partial_frame() {
        let mut input = Cursor::new(vec![STX, STX, 0x09]);
        let err = FrameReader::default()
            .read_frame(&mut input)
            .unwrap_err();
        match err {
            Error::Transport(TransportError::Timeout { partial }) => {
                assert_eq!(partial, vec![STX, STX, 0x09]);
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_serial_timeout_is_timeout() {
        let mut input = TimeoutReader {
            data: VecDeque::from(vec![STX]),
        };
        let err = FrameReader::default()
            .read_frame(&mut input)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Timeout { ref partial }) if partial == &vec![STX]
        ));
    }

    #[test]
    fn test_empty_line_times_out_immediately() {
        let mut input = Cursor::new(Vec::new());
        let err = FrameReader::default()
            .read_frame(&mut input)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Timeout { ref partial }) if partial.is_empty()
        ));
    }

    #[test]
    fn test_unterminated_flood_is_rejected() {
        let mut input = Cursor::new(vec![0x55; MAX_RESPONSE_LENGTH + 10]);
        let err = FrameReader::default()
            .read_frame(&mut input)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
