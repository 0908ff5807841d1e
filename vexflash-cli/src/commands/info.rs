//! Image info and port listing command implementations.

use {
    crate::config::Config,
    anyhow::{Context, Result},
    console::style,
    std::path::Path,
    vexflash::{
        DetectedPort, ProgramImage, detect_ports_with, format_port_list, select_port,
    },
};

fn port_json(p: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": p.name,
        "device": p.device.name(),
        "known": p.device.is_known(),
        "cable": p.device.is_programming_cable(),
        "vid": p.vid,
        "pid": p.pid,
        "manufacturer": p.manufacturer,
        "product": p.product,
        "serial": p.serial,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, json: bool) -> Result<()> {
    let detected = detect_ports_with(&config.cable_ids());

    if json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for line in format_port_list(&detected) {
        eprintln!("  {} {}", style("•").green(), line);
    }

    if let Ok(best) = select_port(&detected)
        && best.device.is_programming_cable()
    {
        eprintln!(
            "\n{} Programming cable: {}",
            style("→").green().bold(),
            style(&best.name).cyan().bold()
        );
    }

    Ok(())
}

fn load_image(hex: &Path) -> Result<ProgramImage> {
    ProgramImage::from_file(hex).with_context(|| format!("Failed to load {}", hex.display()))
}

/// Summary of an image as JSON.
fn image_json(image: &ProgramImage) -> serde_json::Value {
    serde_json::json!({
        "start_address": format!("0x{:04X}", image.start_address()),
        "end_address": format!("0x{:04X}", image.end_address()),
        "length": image.len(),
        "erase_rows": image.erase_rows(),
        "write_commands": image.write_clusters(),
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(hex: &Path, json: bool) -> Result<()> {
    let image = load_image(hex)?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": image_json(&image),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Program image").bold().underlined());
    eprintln!("  File:           {}", hex.display());
    eprintln!(
        "  Address range:  0x{:04X}..0x{:04X}",
        image.start_address(),
        image.end_address()
    );
    eprintln!("  Length:         {} bytes", image.len());
    eprintln!("  Erase rows:     {}", image.erase_rows());
    eprintln!("  Write commands: {}", image.write_clusters());

    Ok(())
}
