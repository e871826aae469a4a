//! osd-coretrace-log - record the instruction trace of a Core Trace Module

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use osd_cli::args::{ClientArgs, CommonArgs, ModuleArgs};
use osd_cli::format::ctm_event_line;
use osd_cli::signal;
use osd_core::diaddr::DiAddr;
use osd_core::ModuleType;
use osd_net::client::ctm;
use osd_net::Flags;

#[derive(Debug, Parser)]
#[command(name = "osd-coretrace-log", version, about = "Log Core Trace Module events")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    client: ClientArgs,

    #[command(flatten)]
    module: ModuleArgs,

    /// Output file; standard output if not given
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.common.load_config()?;
    cli.common.init_logging(&config);

    let mut out: Box<dyn Write + Send> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout()),
    };

    let hm = cli.client.connect(&config, None)?;
    let addr = cli.module.resolve(&hm, ModuleType::Ctm)?;
    let desc = ctm::get_desc(&hm, addr)
        .with_context(|| format!("reading CTM descriptor at {}", DiAddr(addr)))?;
    log::info!(
        "logging CTM at {} (address width {}, data width {})",
        DiAddr(addr),
        desc.addr_width,
        desc.data_width
    );

    hm.set_event_handler(Some(ctm::event_handler(desc, move |res| match res {
        Ok(ev) => {
            if let Err(e) = writeln!(out, "{}", ctm_event_line(&ev)) {
                log::error!("writing trace: {}", e);
            }
        }
        Err(e) => log::error!("undecodable CTM event: {}", e),
    })));
    hm.set_event_destination(addr, None, Flags::NONE)?;
    hm.set_event_active(addr, true, Flags::NONE)?;

    let (_stop_tx, stop_rx) = signal::stop_channel();
    loop {
        match stop_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if !hm.is_connected() {
                    anyhow::bail!("lost connection to the host controller");
                }
            }
        }
    }

    if let Err(e) = hm.set_event_active(addr, false, Flags::NONE) {
        log::warn!("unable to stop the CTM: {}", e);
    }
    hm.set_event_handler(None);
    Ok(())
}
