//! osd-terminal - a character terminal to the target's DEM-UART
//!
//! Lines read from standard input are sent to the UART, characters the
//! UART sends are written to standard output.

use std::io::{BufRead, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use osd_cli::args::{ClientArgs, CommonArgs, ModuleArgs};
use osd_cli::signal;
use osd_core::diaddr::DiAddr;
use osd_core::ModuleType;
use osd_net::client::dem_uart;

#[derive(Debug, Parser)]
#[command(name = "osd-terminal", version, about = "Terminal for the Open SoC Debug UART")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    client: ClientArgs,

    #[command(flatten)]
    module: ModuleArgs,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.common.load_config()?;
    cli.common.init_logging(&config);

    let hm = cli.client.connect(&config, None)?;
    let addr = cli.module.resolve(&hm, ModuleType::DemUart)?;
    let desc = dem_uart::get_desc(&hm, addr)
        .with_context(|| format!("checking DEM-UART at {}", DiAddr(addr)))?;
    log::info!("terminal connected to {}", DiAddr(addr));

    hm.set_event_handler(Some(dem_uart::event_handler(desc, |c| {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(&[c]).and_then(|_| stdout.flush()) {
            log::error!("writing to stdout: {}", e);
        }
    })));

    let (line_tx, line_rx) = mpsc::channel::<Vec<u8>>();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let mut stdin = std::io::stdin().lock();
            let mut line = Vec::new();
            loop {
                line.clear();
                match stdin.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if line_tx.send(line.clone()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("reading stdin: {}", e);
                        break;
                    }
                }
            }
        })?;

    let (_stop_tx, stop_rx) = signal::stop_channel();
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        match line_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => dem_uart::send_string(&hm, &desc, &line)?,
            Err(RecvTimeoutError::Timeout) => {
                if !hm.is_connected() {
                    anyhow::bail!("lost connection to the host controller");
                }
            }
            // end of input
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}
