//! osd-systrace-log - record the events of a System Trace Module
//!
//! Activates the STM and logs its events until interrupted. Software
//! prints (event id 4) are collected into lines.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use osd_cli::args::{ClientArgs, CommonArgs, ModuleArgs};
use osd_cli::format::stm_event_line;
use osd_cli::signal;
use osd_core::decoder::stm::PrintBuffer;
use osd_core::diaddr::DiAddr;
use osd_core::{ModuleType, Packet};
use osd_net::client::stm;
use osd_net::Flags;

#[derive(Debug, Parser)]
#[command(name = "osd-systrace-log", version, about = "Log System Trace Module events")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    client: ClientArgs,

    #[command(flatten)]
    module: ModuleArgs,

    /// File for all events, one `timestamp id value` line each
    #[arg(short, long, value_name = "FILE")]
    event_file: Option<PathBuf>,

    /// File for the software prints; standard output if not given
    #[arg(short = 'p', long, value_name = "FILE")]
    sysprint_file: Option<PathBuf>,

    /// File for the undecoded event packets
    #[arg(short, long, value_name = "FILE")]
    raw_file: Option<PathBuf>,
}

fn create(path: &PathBuf) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.common.load_config()?;
    cli.common.init_logging(&config);

    let mut event_out = cli.event_file.as_ref().map(create).transpose()?;
    let mut sysprint_out: Box<dyn Write + Send> = match &cli.sysprint_file {
        Some(path) => Box::new(create(path)?),
        None => Box::new(std::io::stdout()),
    };
    let mut raw_out = cli.raw_file.as_ref().map(create).transpose()?;

    let hm = cli.client.connect(&config, None)?;
    let addr = cli.module.resolve(&hm, ModuleType::Stm)?;
    let desc = stm::get_desc(&hm, addr)
        .with_context(|| format!("reading STM descriptor at {}", DiAddr(addr)))?;
    log::info!("logging STM at {} ({} bit values)", DiAddr(addr), desc.valwidth);

    let mut prints = PrintBuffer::new();
    let mut decode = stm::event_handler(desc, move |res| {
        let ev = match res {
            Ok(ev) => ev,
            Err(e) => {
                log::error!("undecodable STM event: {}", e);
                return;
            }
        };
        if let Some(out) = event_out.as_mut() {
            if let Err(e) = writeln!(out, "{}", stm_event_line(&ev)) {
                log::error!("writing event file: {}", e);
            }
        }
        if !ev.is_print_event() {
            return;
        }
        match prints.add(&ev) {
            Ok(Some(line)) => {
                let written = sysprint_out
                    .write_all(line.as_bytes())
                    .and_then(|_| sysprint_out.flush());
                if let Err(e) = written {
                    log::error!("writing sysprint: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("dropping print event: {}", e),
        }
    });
    hm.set_event_handler(Some(Box::new(move |pkg: Packet| {
        if let Some(out) = raw_out.as_mut() {
            if let Err(e) = pkg.write_to(out) {
                log::error!("writing raw file: {}", e);
            }
        }
        decode(pkg);
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
        log::warn!("unable to stop the STM: {}", e);
    }
    // dropping the handler flushes the files
    hm.set_event_handler(None);
    Ok(())
}
