//! Finding the programming cable among the host's serial ports.
//!
//! The controller is reached through a Prolific PL2303 USB-serial cable.
//! Other common USB-UART bridges are recognised too so a port listing can
//! name them, but a PL2303 always wins automatic selection.

use crate::error::{Error, Result};
use crate::port::PortInfo;

#[cfg(feature = "native")]
use log::{debug, trace};

/// Known USB-serial bridge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Prolific PL2303, the programming cable.
    Prolific,
    /// CH340/CH341.
    Ch340,
    /// Silicon Labs CP210x.
    Cp210x,
    /// FTDI FT232 family.
    Ftdi,
    /// A VID/PID the user declared as a programming cable.
    Configured,
    /// Anything else.
    Unknown,
}

/// USB vendor ID of the programming cable.
pub const PROLIFIC_VID: u16 = 0x067B;

const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (PROLIFIC_VID, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
    (0x1A86, &[0x7523, 0x7522, 0x5523], DeviceKind::Ch340),
    (0x10C4, &[0xEA60, 0xEA70], DeviceKind::Cp210x),
    (0x0403, &[0x6001, 0x6010, 0x6014, 0x6015], DeviceKind::Ftdi),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && pids.contains(&pid))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prolific => "PL2303",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Configured => "Configured cable",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognised bridge.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Whether this is the programming cable.
    pub fn is_programming_cable(&self) -> bool {
        matches!(self, Self::Prolific | Self::Configured)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Prolific | Self::Configured => 0,
            Self::Ch340 | Self::Cp210x | Self::Ftdi => 1,
            Self::Unknown => 2,
        }
    }
}

/// A serial port with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified bridge kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        Self {
            name: info.name,
            device,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

/// Classify `ports` and order them for selection: programming cables
/// first, then other known bridges, then the rest. Enumeration order is
/// kept within each group.
pub fn rank_ports(ports: Vec<PortInfo>) -> Vec<DetectedPort> {
    rank_ports_with(ports, &[])
}

/// Like [`rank_ports`], additionally treating every `(vid, pid)` in
/// `extra_cables` as a programming cable.
pub fn rank_ports_with(ports: Vec<PortInfo>, extra_cables: &[(u16, u16)]) -> Vec<DetectedPort> {
    let mut detected: Vec<DetectedPort> = ports.into_iter().map(DetectedPort::from).collect();
    for port in &mut detected {
        if let (Some(vid), Some(pid)) = (port.vid, port.pid)
            && extra_cables.contains(&(vid, pid))
        {
            port.device = DeviceKind::Configured;
        }
    }
    detected.sort_by_key(|p| p.device.rank());
    detected
}

/// Pick the port to use from an already ranked list.
pub fn select_port(ranked: &[DetectedPort]) -> Result<&DetectedPort> {
    ranked.first().ok_or(Error::DeviceNotFound)
}

/// All serial ports on this host, ranked, with extra cable identities.
#[cfg(feature = "native")]
pub fn detect_ports_with(extra_cables: &[(u16, u16)]) -> Vec<DetectedPort> {
    use crate::port::{NativePortEnumerator, PortEnumerator};

    match NativePortEnumerator::list_ports() {
        Ok(ports) => {
            let ranked = rank_ports_with(ports, extra_cables);
            for port in &ranked {
                trace!("Found port: {} ({})", port.name, port.device.name());
            }
            ranked
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// One display line per port.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };
            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}
