//! Upload and diagnostic read command implementations.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::Path;
use vexflash::{Flasher, NativePort, ProgramImage, SerialConfig, UploadState};

use crate::config::Config;
use crate::{Cli, CliError, get_port, resolve_timeout, use_fancy_output};

const PROGRAM_MODE_PROMPT: &str =
    "Press the PROGRAM button on the programming module until PGRM STATUS flashes. Continue?";

fn open_flasher(cli: &Cli, config: &mut Config) -> Result<Flasher<NativePort>> {
    let port = get_port(cli, config)?;
    let serial = SerialConfig::new(&port).with_timeout(resolve_timeout(cli, config));

    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            port,
            serial.baud_rate
        );
    }

    Flasher::open_with(&serial).with_context(|| format!("Failed to open {port}"))
}

/// Operator confirmation that the controller is in program mode.
fn confirm_program_mode() -> vexflash::Result<()> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(PROGRAM_MODE_PROMPT)
        .default(true)
        .interact_opt()
        .map_err(|dialoguer::Error::IO(e)| vexflash::Error::Io(e))?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(vexflash::Error::Interrupted)
    }
}

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:10} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Upload command implementation.
pub(crate) fn cmd_upload(cli: &Cli, config: &mut Config, hex: &Path, yes: bool) -> Result<()> {
    let image =
        ProgramImage::from_file(hex).with_context(|| format!("Failed to load {}", hex.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} {}: {} bytes at 0x{:04X}..0x{:04X}",
            style("📦").cyan(),
            hex.display(),
            image.len(),
            image.start_address(),
            image.end_address()
        );
    }

    let skip_prompt = yes || config.upload.skip_prompt;
    if !skip_prompt && (cli.non_interactive || !std::io::stdin().is_terminal()) {
        return Err(CliError::Usage(
            "program-mode confirmation needs a terminal; pass --yes once the controller is in program mode"
                .to_string(),
        )
        .into());
    }

    let mut flasher = open_flasher(cli, config)?;
    let pb = progress_bar(cli);

    let mut gate = || -> vexflash::Result<()> {
        if skip_prompt {
            Ok(())
        } else {
            confirm_program_mode()
        }
    };

    let mut phase = UploadState::Idle;
    let result = flasher.upload(&image, &mut gate, &mut |state, done, total| {
        if state != phase {
            phase = state;
            pb.set_message(state.to_string());
            pb.set_length(total as u64);
        }
        pb.set_position(done as u64);
    });

    match result {
        Ok(()) => {
            pb.finish_with_message("Done");
            if !cli.quiet {
                eprintln!(
                    "\n{} Upload complete, program is running",
                    style("🎉").green().bold()
                );
            }
            Ok(())
        },
        Err(vexflash::Error::Interrupted) => {
            pb.abandon();
            Err(CliError::Cancelled("upload cancelled".to_string()).into())
        },
        Err(e) => {
            pb.abandon();
            Err(anyhow::Error::new(e).context(format!(
                "Upload failed during {phase}; the controller may be partly erased, run the upload again"
            )))
        },
    }
}

/// One `address: bytes` line per 16 bytes.
pub(crate) fn format_dump(address: u32, data: &[u8]) -> Vec<String> {
    data.chunks(16)
        .zip((address..).step_by(16))
        .map(|(chunk, addr)| format!("{addr:04X}: {}", vexflash::error::hex_dump(chunk)))
        .collect()
}

/// Read command implementation.
pub(crate) fn cmd_read(cli: &Cli, config: &mut Config, address: u32, length: usize) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;

    let result = flasher.read_program_memory(address, length);
    let closed = flasher.close();
    let data = result.with_context(|| format!("Failed to read {length} bytes at 0x{address:04X}"))?;
    closed?;

    for line in format_dump(address, &data) {
        println!("{line}");
    }
    Ok(())
}
