//! Firmware image formats.

pub mod hex;

pub use hex::{AddressRange, HexRecord, ProgramImage};
