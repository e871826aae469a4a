//! osd-gateway - bridge a debug device into the host controller
//!
//! Forwards packets between the device (a simulation's TCP debug port or
//! a serial port) and the host controller, and reports the transferred
//! bytes on exit.

use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use osd_cli::args::{parse_number, CommonArgs};
use osd_cli::format::stats_str;
use osd_cli::signal;
use osd_net::bus::tcp::TcpConnector;
use osd_net::config::DeviceKind;
use osd_net::device::serial::SerialDevice;
use osd_net::device::tcp::TcpDevice;
use osd_net::Gateway;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "osd-gateway", version, about = "Open SoC Debug device gateway")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Host controller address, e.g. tcp://127.0.0.1:9537
    #[arg(long, value_name = "ADDRESS")]
    hostctrl: Option<String>,

    /// Subnet served by the device
    #[arg(short, long, value_parser = parse_number)]
    subnet: Option<u64>,

    /// Device link: tcp or serial
    #[arg(short, long, value_parser = parse_device_kind)]
    device: Option<DeviceKind>,

    /// TCP address of the device (host:port)
    #[arg(short = 'a', long, value_name = "HOST:PORT")]
    device_address: Option<String>,

    /// Serial port of the device
    #[arg(long, value_name = "PATH")]
    serial_port: Option<String>,

    /// Serial port speed in baud
    #[arg(long, value_name = "BAUD")]
    serial_speed: Option<u32>,

    /// Print the transfer statistics on exit as JSON
    #[arg(short, long)]
    json: bool,
}

fn parse_device_kind(s: &str) -> Result<DeviceKind, String> {
    s.parse()
        .map_err(|_| format!("unknown device '{}', expected tcp or serial", s))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.common.load_config()?;
    cli.common.init_logging(&config);

    let mut section = config.gateway.clone();
    if let Some(hostctrl) = cli.hostctrl {
        section.hostctrl = hostctrl;
    }
    if let Some(subnet) = cli.subnet {
        anyhow::ensure!(
            subnet <= u64::from(osd_core::constants::DIADDR_SUBNET_MAX),
            "subnet {} out of range",
            subnet
        );
        section.subnet = subnet as u16;
    }
    if let Some(device) = cli.device {
        section.device = device;
    }
    if let Some(address) = cli.device_address {
        section.device_address = address;
    }
    if let Some(path) = cli.serial_port {
        section.serial.path = path;
    }
    if let Some(baud) = cli.serial_speed {
        section.serial.baud = baud;
    }

    log::info!("Starting osd-gateway {} for subnet {}", VERSION, section.subnet);

    let connector = TcpConnector::new(section.hostctrl.clone());
    let mut gateway = match section.device {
        DeviceKind::Tcp => Gateway::new(
            connector,
            section.subnet,
            TcpDevice::new(section.device_address.clone()),
        ),
        DeviceKind::Serial => Gateway::new(
            connector,
            section.subnet,
            SerialDevice::new(section.serial.clone()),
        ),
    };
    gateway
        .connect()
        .with_context(|| format!("connecting gateway to {}", section.hostctrl))?;

    let (_stop_tx, stop_rx) = signal::stop_channel();
    let mut device_lost = false;
    loop {
        match stop_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) => break,
            Err(RecvTimeoutError::Timeout) => {
                if gateway.device_disconnect_detected() {
                    log::error!("Device disconnected");
                    device_lost = true;
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("Shutting down...");
    let stats = gateway.transfer_stats();
    if let Err(e) = gateway.disconnect() {
        log::warn!("disconnect failed: {}", e);
    }

    if section.print_stats || cli.json {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!("{}", stats_str(&stats));
        }
    }

    if device_lost {
        anyhow::bail!("lost connection to the device");
    }
    Ok(())
}
