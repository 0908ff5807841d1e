//! Bootloader protocol implementation.

pub mod exchange;
pub mod frame;
pub mod packet;

// Re-export common types
pub use exchange::{Reply, send_command};
pub use frame::FrameReader;
pub use packet::{Command, ESC, ETX, Packet, RESUME_TERMINATOR, STX};
