//! Serial port selection.
//!
//! An explicit `--port` (or configured port) is used as given. Otherwise
//! the detected programming cables are the candidates; if there are none,
//! every port is. One candidate is picked automatically, several are
//! offered in a `dialoguer` menu. Non-interactive mode never prompts.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::io::IsTerminal,
    vexflash::{DetectedPort, DeviceKind, detect_ports_with},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if there is no single candidate).
    pub non_interactive: bool,
}

/// Result of port selection.
pub struct SelectedPort {
    /// The selected port.
    pub port: DetectedPort,
    /// Whether the port is a recognised programming cable.
    pub is_cable: bool,
}

impl SelectedPort {
    fn new(port: DetectedPort) -> Self {
        let is_cable = port.device.is_programming_cable();
        Self { port, is_cable }
    }
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("port selection cancelled".to_string()).into()
}

/// Programming cables if any are present, otherwise everything.
fn candidates(ports: Vec<DetectedPort>) -> Vec<DetectedPort> {
    if ports.iter().any(|p| p.device.is_programming_cable()) {
        ports
            .into_iter()
            .filter(|p| p.device.is_programming_cable())
            .collect()
    } else {
        ports
    }
}

fn select_non_interactive_port(mut candidates: Vec<DetectedPort>) -> Result<SelectedPort> {
    match candidates.len() {
        1 => Ok(SelectedPort::new(candidates.remove(0))),
        0 => Err(usage_err("no serial ports available")),
        n => Err(usage_err(&format!(
            "{n} candidate serial ports found; choose one with --port"
        ))),
    }
}

/// Pick the port to use.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    let ports = detect_ports_with(&config.cable_ids());

    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(ports, port_name));
    }
    if let Some(port_name) = &config.port.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(ports, port_name));
    }

    if ports.is_empty() {
        return Err(usage_err("no serial ports found"));
    }

    let candidates = candidates(ports);

    if options.non_interactive {
        return select_non_interactive_port(candidates);
    }

    if candidates.len() == 1 {
        let selected = SelectedPort::new(candidates.into_iter().next().ok_or_else(cancelled)?);
        if selected.is_cable {
            info!(
                "Auto-selected port: {} [{}]",
                selected.port.name,
                selected.port.device.name()
            );
            return Ok(selected);
        }
        ensure_interactive_terminal()?;
        return confirm_single_port(selected.port);
    }

    ensure_interactive_terminal()?;
    select_port_interactive(candidates)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) if io_err.kind() == std::io::ErrorKind::Interrupted => {
            cancelled()
        },
        DialoguerError::IO(io_err) => usage_err(&format!("prompt failed: {io_err}")),
    }
}

/// Match `name` against detected ports, falling back to a bare entry.
fn find_port_by_name(ports: Vec<DetectedPort>, name: &str) -> SelectedPort {
    let found = ports
        .into_iter()
        .find(|p| p.name == name || p.name.eq_ignore_ascii_case(name));

    SelectedPort::new(found.unwrap_or_else(|| DetectedPort {
        name: name.to_string(),
        device: DeviceKind::Unknown,
        vid: None,
        pid: None,
        manufacturer: None,
        product: None,
        serial: None,
    }))
}

fn port_label(port: &DetectedPort) -> String {
    let name = if port.device.is_programming_cable() {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let max_item_width = usize::from(console::Term::stderr().size().1).saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| console::truncate_str(&port_label(port), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the programming cable")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(SelectedPort::new)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(cancelled()),
    }
}

fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "No programming cable recognised. Use {}?",
            port_label(&port)
        ))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort::new(port))
    } else {
        Err(cancelled())
    }
}

/// Offer to remember an unrecognised adapter as a programming cable.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.port.usb_device.iter().any(|d| d.matches(vid, pid)) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Remember {vid:04X}:{pid:04X} as a programming cable?"
        ))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed && let Err(e) = config.remember_usb_device(vid, pid) {
        error!("Failed to save port configuration: {e}");
    }

    Ok(())
}
