//! osd-tool - inspect and control the debug modules of a subnet

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use osd_cli::args::{parse_diaddr, parse_number, parse_reg_width, ClientArgs, CommonArgs};
use osd_cli::format::{hexdump, module_table};
use osd_core::diaddr::DiAddr;
use osd_core::mam::MemDesc;
use osd_net::client::{mam, scm};
use osd_net::{Flags, HostModule, OsdError};

#[derive(Debug, Parser)]
#[command(name = "osd-tool", version, about = "Open SoC Debug command line tool")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    client: ClientArgs,

    /// Subnet to work on
    #[arg(short, long, default_value = "0", value_parser = parse_number, global = true)]
    subnet: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the debug modules of the subnet
    Ls {
        /// Print as JSON
        #[arg(short, long)]
        json: bool,
    },
    /// Read a register
    RegRead {
        /// Module address, `subnet.local` or a number
        #[arg(value_parser = parse_diaddr)]
        module: u16,
        #[arg(value_parser = parse_number)]
        reg: u64,
        /// Register width in bits
        #[arg(short, long, default_value = "16", value_parser = parse_reg_width)]
        width: u16,
    },
    /// Write a register
    RegWrite {
        #[arg(value_parser = parse_diaddr)]
        module: u16,
        #[arg(value_parser = parse_number)]
        reg: u64,
        #[arg(value_parser = parse_number)]
        value: u64,
        #[arg(short, long, default_value = "16", value_parser = parse_reg_width)]
        width: u16,
    },
    /// Release the CPUs from reset
    Start,
    /// Hold the CPUs in reset
    Stop,
    /// Pulse the system reset
    Reset,
    /// Read target memory
    MemRead {
        #[arg(value_parser = parse_number)]
        addr: u64,
        #[arg(value_parser = parse_number)]
        len: u64,
        /// Index of the memory as listed by `ls`
        #[arg(short, long, default_value_t = 0)]
        memory: usize,
        /// Write the data to a file instead of dumping it
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Write a file to target memory
    MemWrite {
        #[arg(value_parser = parse_number)]
        addr: u64,
        file: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        memory: usize,
        /// Read the data back and compare
        #[arg(long)]
        verify: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.common.load_config()?;
    cli.common.init_logging(&config);

    anyhow::ensure!(
        cli.subnet <= u64::from(osd_core::constants::DIADDR_SUBNET_MAX),
        "subnet {} out of range",
        cli.subnet
    );
    let subnet = cli.subnet as u16;
    let hm = cli.client.connect(&config, None)?;

    match cli.command {
        Command::Ls { json } => list(&hm, subnet, json),
        Command::RegRead { module, reg, width } => {
            let reg = register(reg)?;
            let value = hm
                .reg_read(module, reg, width, Flags::NONE)
                .with_context(|| format!("reading {:#06x} of {}", reg, DiAddr(module)))?;
            println!("{:#x}", value);
            Ok(())
        }
        Command::RegWrite {
            module,
            reg,
            value,
            width,
        } => {
            let reg = register(reg)?;
            hm.reg_write(module, reg, width, value, Flags::NONE)
                .with_context(|| format!("writing {:#06x} of {}", reg, DiAddr(module)))?;
            Ok(())
        }
        Command::Start => Ok(scm::cpus_start(&hm, subnet)?),
        Command::Stop => Ok(scm::cpus_stop(&hm, subnet)?),
        Command::Reset => Ok(scm::system_reset(&hm, subnet)?),
        Command::MemRead {
            addr,
            len,
            memory,
            output,
        } => {
            let desc = select_memory(&hm, subnet, memory)?;
            let data = mam::read(&hm, &desc, addr, len as usize)?;
            match output {
                Some(path) => std::fs::write(&path, &data)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => print!("{}", hexdump(addr, &data)),
            }
            Ok(())
        }
        Command::MemWrite {
            addr,
            file,
            memory,
            verify,
        } => {
            let desc = select_memory(&hm, subnet, memory)?;
            let data = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            if verify {
                mam::write_verified(&hm, &desc, addr, &data)?;
            } else {
                mam::write(&hm, &desc, addr, &data)?;
            }
            log::info!("wrote {} bytes to {:#x}", data.len(), addr);
            Ok(())
        }
    }
}

fn register(reg: u64) -> anyhow::Result<u16> {
    u16::try_from(reg).map_err(|_| anyhow::anyhow!("register address {:#x} out of range", reg))
}

fn list(hm: &HostModule, subnet: u16, json: bool) -> anyhow::Result<()> {
    let info = scm::get_subnetinfo(hm, subnet)?;
    let modules = match hm.get_modules(subnet) {
        Ok(m) => m,
        Err(OsdError::PartialResult(m)) => {
            log::warn!("not all modules of subnet {} could be described", subnet);
            m
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        let out = serde_json::json!({
            "subnet": subnet,
            "info": info,
            "modules": modules,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "Subnet {}: system vendor {:#06x}, device {:#06x}, max packet length {}",
            subnet, info.vendor_id, info.device_id, info.max_pkt_len
        );
        print!("{}", module_table(&modules));
    }
    Ok(())
}

fn select_memory(hm: &HostModule, subnet: u16, index: usize) -> anyhow::Result<MemDesc> {
    let mut memories = mam::find_memories(hm, subnet)?;
    if index >= memories.len() {
        bail!(
            "memory {} not found, subnet {} has {} memories",
            index,
            subnet,
            memories.len()
        );
    }
    Ok(memories.swap_remove(index))
}
