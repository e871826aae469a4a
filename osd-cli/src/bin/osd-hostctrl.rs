//! osd-hostctrl - Open SoC Debug host controller
//!
//! Assigns DI addresses to host modules and routes packets between host
//! modules and gateways until interrupted.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use osd_cli::args::{parse_number, CommonArgs};
use osd_cli::signal;
use osd_net::HostController;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "osd-hostctrl", version, about = "Open SoC Debug host controller")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Address to listen on for host modules and gateways
    #[arg(short, long, value_name = "ADDRESS")]
    listen: Option<String>,

    /// Subnet of the host modules
    #[arg(short, long, value_parser = parse_number)]
    subnet: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = cli.common.load_config()?;
    cli.common.init_logging(&config);

    if let Some(listen) = cli.listen {
        config.hostctrl.listen = listen.strip_prefix("tcp://").unwrap_or(&listen).to_string();
    }
    if let Some(subnet) = cli.subnet {
        anyhow::ensure!(
            subnet <= u64::from(osd_core::constants::DIADDR_SUBNET_MAX),
            "subnet {} out of range",
            subnet
        );
        config.hostctrl.subnet = subnet as u16;
    }

    log::info!("Starting osd-hostctrl {}", VERSION);
    let mut hostctrl = HostController::start(&config.hostctrl)
        .with_context(|| format!("listening on {}", config.hostctrl.listen))?;

    let (_stop_tx, stop_rx) = signal::stop_channel();
    loop {
        match stop_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(()) => break,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                if let Some(snapshot) = hostctrl.snapshot() {
                    log::debug!(
                        "{} peers, host modules {:?}, gateways for subnets {:?}",
                        snapshot.peers,
                        snapshot.modules,
                        snapshot.gateways
                    );
                }
            }
            Err(_) => break,
        }
    }

    log::info!("Shutting down...");
    hostctrl.stop();
    Ok(())
}
