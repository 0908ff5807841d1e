//! # vexflash
//!
//! A library for uploading Intel-HEX programs to PIC-based robot
//! controllers through their serial bootloader.
//!
//! The crate covers the whole path from a HEX file to a running program:
//!
//! - HEX parsing into a contiguous, range-checked program image
//! - The bootloader's byte-stuffed, checksummed packet format
//! - Frame reading with per-read timeouts
//! - Erase/write chunk planning and the upload sequence
//! - Serial port discovery for the PL2303 programming cable
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use vexflash::{Flasher, ProgramImage};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = ProgramImage::from_file("robot.hex")?;
//!     println!("{} bytes, {} write commands", image.len(), image.write_clusters());
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut flasher = Flasher::open("/dev/ttyUSB0")?;
//!         flasher.upload(
//!             &image,
//!             &mut || -> vexflash::Result<()> { Ok(()) },
//!             &mut |state, done, total| println!("{state}: {done}/{total}"),
//!         )?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod flasher;
pub mod image;
pub mod plan;
pub mod port;
pub mod protocol;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a process-wide interrupt checker.
///
/// Upload loops poll it before every command and stop with
/// [`Error::Interrupted`] once it returns `true`. Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Whether the embedding application asked to stop.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind, format_port_list, rank_ports, rank_ports_with, select_port},
    error::{Error, HexFormatError, ProtocolError, Result, TransportError},
    flasher::{Flasher, MAX_READ_LENGTH, ProgramModeGate, UploadState},
    image::{AddressRange, HexRecord, ProgramImage},
    plan::{EraseChunk, WriteCluster, plan_erase, plan_write},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Command, Packet, Reply, send_command},
};
#[cfg(feature = "native")]
pub use device::detect_ports_with;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_toggle() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
