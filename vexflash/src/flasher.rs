//! Upload sequencing.
//!
//! An upload walks a fixed sequence:
//!
//! ```text
//! Idle -> AwaitingManualProgramMode -> Erasing -> Writing -> Resuming -> Done
//!                         \______________\___________\_________\-----> Failed
//! ```
//!
//! The operator has to put the controller into program mode by hand before
//! the first command, so the sequence blocks on a [`ProgramModeGate`].
//! Every failure is fatal: nothing is retried, and the port is closed
//! whether the upload succeeds or not. Flash left half-written is recovered
//! by running the whole upload again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vexflash::{Flasher, ProgramImage};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = ProgramImage::from_file("robot.hex")?;
//!     let mut flasher = Flasher::open("/dev/ttyUSB0")?;
//!
//!     flasher.upload(
//!         &image,
//!         &mut || -> vexflash::Result<()> { Ok(()) },
//!         &mut |state, done, total| println!("{state}: {done}/{total}"),
//!     )?;
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::image::hex::{MAX_PROGRAM_ADDRESS, MIN_PROGRAM_ADDRESS, ProgramImage};
use crate::plan::{self, ERASE_ROW_SIZE};
use crate::port::Port;
use crate::protocol::{Command, Packet, send_command};
use log::{debug, info, warn};
use std::fmt;

/// Longest reply a single read command may request.
pub const MAX_READ_LENGTH: usize = 100;

/// Where an upload currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UploadState {
    /// Nothing started.
    Idle,
    /// Waiting for the operator to enable program mode.
    AwaitingManualProgramMode,
    /// Erasing flash rows.
    Erasing,
    /// Writing clusters.
    Writing,
    /// Handing control back to the user program.
    Resuming,
    /// Upload finished.
    Done,
    /// Upload aborted.
    Failed,
}

impl UploadState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::AwaitingManualProgramMode => "Awaiting program mode",
            Self::Erasing => "Erasing",
            Self::Writing => "Writing",
            Self::Resuming => "Resuming",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Blocks until the operator confirms the controller is in program mode.
///
/// Returning an error aborts the upload before anything is sent.
pub trait ProgramModeGate {
    /// Wait for confirmation.
    fn wait_for_program_mode(&mut self) -> Result<()>;
}

impl<F> ProgramModeGate for F
where
    F: FnMut() -> Result<()>,
{
    fn wait_for_program_mode(&mut self) -> Result<()> {
        self()
    }
}

type InterruptChecker = Box<dyn Fn() -> bool + Send>;

/// Drives the bootloader over a [`Port`].
///
/// The flasher owns the port for its whole lifetime; no two commands are
/// ever in flight.
pub struct Flasher<P: Port> {
    port: P,
    state: UploadState,
    interrupt: Option<InterruptChecker>,
}

impl<P: Port> Flasher<P> {
    /// Create a flasher on an already opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            state: UploadState::Idle,
            interrupt: None,
        }
    }

    /// Use `checker` instead of the process-wide interrupt checker.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.interrupt = Some(Box::new(checker));
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// State reached by the last upload.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Run the full upload sequence for `image`.
    ///
    /// `progress` receives `(state, done, total)` after each erase chunk
    /// (in rows) and each write cluster (in bytes). The port is closed
    /// before this returns, on success and on failure alike.
    pub fn upload(
        &mut self,
        image: &ProgramImage,
        gate: &mut dyn ProgramModeGate,
        progress: &mut dyn FnMut(UploadState, usize, usize),
    ) -> Result<()> {
        let result = self.run_upload(image, gate, progress);

        self.state = if result.is_ok() {
            UploadState::Done
        } else {
            UploadState::Failed
        };
        let closed = self.port.close();

        match (result, closed) {
            (Err(e), Err(close_err)) => {
                warn!("Failed to close {} after error: {close_err}", self.port.name());
                Err(e)
            },
            (Err(e), Ok(())) => Err(e),
            (Ok(()), closed) => {
                info!("Upload complete");
                closed
            },
        }
    }

    fn run_upload(
        &mut self,
        image: &ProgramImage,
        gate: &mut dyn ProgramModeGate,
        progress: &mut dyn FnMut(UploadState, usize, usize),
    ) -> Result<()> {
        info!(
            "Program size: {} bytes ({:#06x}..{:#06x})",
            image.len(),
            image.start_address(),
            image.end_address()
        );

        self.enter(UploadState::AwaitingManualProgramMode);
        info!(
            "Waiting for program mode on {} (read timeout {:?})",
            self.port.name(),
            self.port.timeout()
        );
        gate.wait_for_program_mode()?;
        self.check_interrupted()?;
        self.port.clear_buffers()?;

        self.enter(UploadState::Erasing);
        let rows = plan::erase_rows_for(image.len());
        self.erase_rows(image.start_address(), rows, &mut |done, total| {
            progress(UploadState::Erasing, done, total);
        })?;

        self.enter(UploadState::Writing);
        self.write_image(image.start_address(), image.bytes(), &mut |done, total| {
            progress(UploadState::Writing, done, total);
        })?;

        self.enter(UploadState::Resuming);
        self.return_to_user_code()?;
        progress(UploadState::Done, image.len(), image.len());
        Ok(())
    }

    fn enter(&mut self, state: UploadState) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
    }

    fn check_interrupted(&self) -> Result<()> {
        let interrupted = match &self.interrupt {
            Some(checker) => checker(),
            None => crate::is_interrupted_requested(),
        };
        if interrupted {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Erase `length` bytes starting at `address`.
    ///
    /// `length` must be a whole number of 64-byte rows.
    pub fn erase_program_memory(&mut self, address: u32, length: usize) -> Result<()> {
        if length % ERASE_ROW_SIZE != 0 {
            return Err(Error::InvalidArgument(format!(
                "erase length {length} is not a multiple of {ERASE_ROW_SIZE}"
            )));
        }
        self.erase_rows(address, length / ERASE_ROW_SIZE, &mut |_, _| {})
    }

    fn erase_rows(
        &mut self,
        address: u32,
        rows: usize,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        let chunks = plan::plan_erase(address, rows);
        info!("Erasing {rows} rows in {} commands", chunks.len());

        let mut done = 0;
        for chunk in chunks {
            check_address(chunk.address)?;
            self.check_interrupted()?;

            debug!("Erasing {} rows at {:#06x}", chunk.rows, chunk.address);
            let packet = Packet::erase(chunk.rows, chunk.address);
            send_command(&mut self.port, &packet, Command::EraseProgramMemory.response_terminator())?;

            done += usize::from(chunk.rows);
            progress(done, rows);
        }
        Ok(())
    }

    /// Write `code` to flash starting at `address`.
    ///
    /// The data is padded with erased bytes out to 8-byte block boundaries
    /// and sent one 64-byte cluster at a time. The target rows must already
    /// be erased.
    pub fn write_program_memory(&mut self, address: u32, code: &[u8]) -> Result<()> {
        self.write_image(address, code, &mut |_, _| {})
    }

    fn write_image(
        &mut self,
        address: u32,
        code: &[u8],
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        let clusters = plan::plan_write(address, code);
        let total: usize = clusters.iter().map(|c| c.data.len()).sum();
        info!("Writing {total} bytes in {} commands", clusters.len());

        let mut done = 0;
        for cluster in clusters {
            check_address(cluster.address)?;
            self.check_interrupted()?;

            debug!("Writing {} blocks at {:#06x}", cluster.blocks, cluster.address);
            let written = cluster.data.len();
            let packet = Packet::write(cluster.blocks, cluster.address, cluster.data);
            send_command(&mut self.port, &packet, Command::WriteProgramMemory.response_terminator())?;

            done += written;
            progress(done, total);
        }
        Ok(())
    }

    /// Read up to [`MAX_READ_LENGTH`] bytes of program memory.
    ///
    /// Diagnostic only; the upload sequence never reads back.
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_program_memory(&mut self, address: u32, length: usize) -> Result<Vec<u8>> {
        if length == 0 || length > MAX_READ_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "read length {length} is outside 1..={MAX_READ_LENGTH}"
            )));
        }
        check_address(address)?;
        self.check_interrupted()?;

        debug!("Reading {length} bytes at {address:#06x}");
        let packet = Packet::read(length as u8, address);
        let reply = send_command(&mut self.port, &packet, Command::ReadProgramMemory.response_terminator())?;

        Ok(reply
            .into_packet()
            .and_then(Packet::into_data)
            .unwrap_or_default())
    }

    /// Leave program mode and start the user program.
    ///
    /// Returns whatever the controller printed up to the terminator.
    pub fn return_to_user_code(&mut self) -> Result<Vec<u8>> {
        self.check_interrupted()?;
        info!("Returning to user code");

        let reply = send_command(
            &mut self.port,
            &Packet::return_to_user_code(),
            Command::ReturnToUserCode.response_terminator(),
        )?;
        match reply {
            crate::protocol::Reply::Ack(bytes) => Ok(bytes),
            crate::protocol::Reply::Packet(packet) => Ok(packet.into_data().unwrap_or_default()),
        }
    }

    /// Release the port.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }
}

fn check_address(address: u32) -> Result<()> {
    if (MIN_PROGRAM_ADDRESS..=MAX_PROGRAM_ADDRESS).contains(&address) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "address {address:#06x} is outside program memory \
             ({MIN_PROGRAM_ADDRESS:#06x}..={MAX_PROGRAM_ADDRESS:#06x})"
        )))
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::Flasher;
    use crate::error::Result;
    use crate::port::{NativePort, SerialConfig};

    impl Flasher<NativePort> {
        /// Open `port_name` with the bootloader's line settings.
        pub fn open(port_name: &str) -> Result<Self> {
            Self::open_with(&SerialConfig::new(port_name))
        }

        /// Open a port with explicit settings.
        pub fn open_with(config: &SerialConfig) -> Result<Self> {
            Ok(Self::new(NativePort::open(config)?))
        }
    }
}
