//! Command-line arguments shared by the OSD tools.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Args};
use log::LevelFilter;

use osd_net::bus::tcp::TcpConnector;
use osd_net::config::{self, OsdConfig};
use osd_core::ModuleType;
use osd_net::{EventHandler, HostModule, OsdError};

/// Config file and verbosity, accepted by every tool.
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (can repeat)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Decrease verbosity (can repeat)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub quiet: u8,
}

impl CommonArgs {
    /// Load the config file if one was given, the defaults otherwise.
    pub fn load_config(&self) -> anyhow::Result<OsdConfig> {
        match &self.config {
            Some(path) => config::parse_file(path)
                .with_context(|| format!("reading config {}", path.display())),
            None => Ok(OsdConfig::default()),
        }
    }

    /// Install `env_logger` at the level picked by `-v`/`-q`, falling back
    /// to the config file's `loglevel`.
    pub fn init_logging(&self, config: &OsdConfig) {
        env_logger::Builder::new()
            .filter_level(level_filter(self.verbose, self.quiet, config.logging.level_filter()))
            .format_timestamp_secs()
            .init();
    }
}

/// Log level for the given `-v` and `-q` counts.
pub fn level_filter(verbose: u8, quiet: u8, fallback: LevelFilter) -> LevelFilter {
    match (verbose, quiet) {
        (0, 0) => fallback,
        (_, 1) => LevelFilter::Warn,
        (_, q) if q > 1 => LevelFilter::Error,
        (1, _) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Where and how a host module tool reaches the host controller.
#[derive(Debug, Clone, Default, Args)]
pub struct ClientArgs {
    /// Host controller address, e.g. tcp://127.0.0.1:9537
    #[arg(long, value_name = "ADDRESS")]
    pub hostctrl: Option<String>,

    /// Register access timeout in milliseconds, 0 waits forever
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

impl ClientArgs {
    /// Create a host module and connect it to the host controller.
    pub fn connect(
        &self,
        config: &OsdConfig,
        handler: Option<EventHandler>,
    ) -> anyhow::Result<HostModule> {
        let address = self
            .hostctrl
            .clone()
            .unwrap_or_else(|| config.client.hostctrl.clone());
        let mut hm = HostModule::new(TcpConnector::new(address.clone()), handler);
        hm.set_timeout(
            self.timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(config.client.timeout),
        );
        hm.connect()
            .with_context(|| format!("connecting to host controller at {}", address))?;
        log::debug!("connected as {}", osd_core::diaddr::DiAddr(hm.diaddr()));
        Ok(hm)
    }
}

/// Which module a single-module tool talks to.
#[derive(Debug, Clone, Default, Args)]
pub struct ModuleArgs {
    /// Subnet to search for the module
    #[arg(short, long, default_value = "0", value_parser = parse_number)]
    pub subnet: u64,

    /// Module address, `subnet.local` or a number; the first module of
    /// the right type in the subnet if not given
    #[arg(short, long, value_parser = parse_diaddr)]
    pub module: Option<u16>,
}

impl ModuleArgs {
    /// Address of the module to use.
    pub fn resolve(&self, hm: &HostModule, ty: ModuleType) -> anyhow::Result<u16> {
        if let Some(addr) = self.module {
            return Ok(addr);
        }
        anyhow::ensure!(
            self.subnet <= u64::from(osd_core::constants::DIADDR_SUBNET_MAX),
            "subnet {} out of range",
            self.subnet
        );
        let modules = match hm.get_modules(self.subnet as u16) {
            Ok(m) | Err(OsdError::PartialResult(m)) => m,
            Err(e) => return Err(e).context("enumerating modules"),
        };
        modules
            .iter()
            .find(|m| m.module_type() == ty)
            .map(|m| m.addr)
            .ok_or_else(|| {
                anyhow::anyhow!("no {} found in subnet {}", ty.long_name(), self.subnet)
            })
    }
}

/// Parse a number given in decimal or with a `0x` prefix.
pub fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

/// Parse a register width of 16, 32 or 64 bits.
pub fn parse_reg_width(s: &str) -> Result<u16, String> {
    match parse_number(s)? {
        w @ (16 | 32 | 64) => Ok(w as u16),
        w => Err(format!("register width must be 16, 32 or 64, got {}", w)),
    }
}

/// Parse a DI address given as `subnet.local` or as a plain number.
pub fn parse_diaddr(s: &str) -> Result<u16, String> {
    if let Some((subnet, local)) = s.split_once('.') {
        let subnet = parse_number(subnet)?;
        let local = parse_number(local)?;
        if subnet > u64::from(osd_core::constants::DIADDR_SUBNET_MAX)
            || local > u64::from(osd_core::constants::DIADDR_LOCAL_MAX)
        {
            return Err(format!("DI address '{}' out of range", s));
        }
        return Ok(osd_core::diaddr::build(subnet as u16, local as u16));
    }
    let addr = parse_number(s)?;
    u16::try_from(addr).map_err(|_| format!("DI address '{}' out of range", s))
}
