//! ConfigObj style configuration file for the OSD daemons and tools.
//!
//! ```text
//! [hostctrl]
//! listen = 127.0.0.1:9537
//! subnet = 1
//!
//! [gateway]
//! hostctrl = tcp://127.0.0.1:9537
//! subnet = 0
//! device = tcp            # or serial
//! device_address = localhost:23000
//!
//! [logging]
//! loglevel = 4
//! ```
//! Unknown sections and keys are ignored. Booleans are `yes/no`,
//! `true/false` or `on/off`, case insensitive.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::device::serial::SerialConfig;
use crate::device::tcp::DEFAULT_PORT;
use crate::hostctrl::{HostControllerConfig, DEFAULT_LISTEN, DEFAULT_SUBNET};
use crate::hostmod::DEFAULT_TIMEOUT;

/// Parsed configuration file.
#[derive(Debug, Clone, Default)]
pub struct OsdConfig {
    pub hostctrl: HostControllerConfig,
    pub gateway: GatewaySection,
    pub client: ClientSection,
    pub logging: LoggingSection,
}

/// How a gateway reaches its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Tcp,
    Serial,
}

impl FromStr for DeviceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(DeviceKind::Tcp),
            "serial" | "uart" => Ok(DeviceKind::Serial),
            _ => Err(()),
        }
    }
}

/// The `[gateway]` section.
#[derive(Debug, Clone)]
pub struct GatewaySection {
    pub hostctrl: String,
    pub subnet: u16,
    pub device: DeviceKind,
    pub device_address: String,
    pub serial: SerialConfig,
    pub print_stats: bool,
}

impl Default for GatewaySection {
    fn default() -> Self {
        GatewaySection {
            hostctrl: format!("tcp://{}", DEFAULT_LISTEN),
            subnet: 0,
            device: DeviceKind::Tcp,
            device_address: format!("localhost:{}", DEFAULT_PORT),
            serial: SerialConfig::default(),
            print_stats: true,
        }
    }
}

/// The `[client]` section, used by host module tools.
#[derive(Debug, Clone)]
pub struct ClientSection {
    pub hostctrl: String,
    /// Register access timeout; zero waits forever.
    pub timeout: Duration,
}

impl Default for ClientSection {
    fn default() -> Self {
        ClientSection {
            hostctrl: format!("tcp://{}", DEFAULT_LISTEN),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Clone)]
pub struct LoggingSection {
    /// 0 (off) to 6 (trace), 4 being info.
    pub loglevel: u8,
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection { loglevel: 4 }
    }
}

impl LoggingSection {
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.loglevel {
            0 => log::LevelFilter::Off,
            1 | 2 => log::LevelFilter::Error,
            3 => log::LevelFilter::Warn,
            4 => log::LevelFilter::Info,
            5 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Configuration parse error.
#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value for '{}': '{}'", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

type Section = HashMap<String, String>;

/// Parse a config string.
pub fn parse(input: &str) -> Result<OsdConfig, ConfigError> {
    let mut sections: HashMap<String, Section> = HashMap::new();
    let mut current: Option<String> = None;

    for (n, line) in input.lines().enumerate() {
        let trimmed = strip_comment(line).trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with('[') {
            if !trimmed.ends_with(']') || trimmed.starts_with("[[") {
                return Err(ConfigError::Parse(format!(
                    "line {}: invalid section header '{}'",
                    n + 1,
                    trimmed
                )));
            }
            let name = trimmed[1..trimmed.len() - 1].trim().to_lowercase();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let (key, value) = trimmed.split_once('=').ok_or_else(|| {
            ConfigError::Parse(format!("line {}: expected 'key = value', got '{}'", n + 1, trimmed))
        })?;
        let Some(section) = current.as_ref() else {
            return Err(ConfigError::Parse(format!(
                "line {}: '{}' outside of a section",
                n + 1,
                key.trim()
            )));
        };
        sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_lowercase(), unquote(value.trim()).to_string());
    }

    let empty = Section::new();
    let get = |name: &str| sections.get(name).unwrap_or(&empty);
    Ok(OsdConfig {
        hostctrl: build_hostctrl_section(get("hostctrl"))?,
        gateway: build_gateway_section(get("gateway"))?,
        client: build_client_section(get("client"))?,
        logging: build_logging_section(get("logging"))?,
    })
}

/// Parse a config file from disk.
pub fn parse_file(path: &Path) -> Result<OsdConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

/// Strip `#` comments from a line, unless inside quotes.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, ch) in line.char_indices() {
        match quote {
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '#' => return &line[..i],
            Some(q) if ch == q => quote = None,
            _ => {}
        }
    }
    line
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
    }
}

fn get_parsed<T: FromStr>(kvs: &Section, key: &str) -> Result<Option<T>, ConfigError> {
    kvs.get(key)
        .map(|v| v.parse::<T>().map_err(|_| invalid(key, v)))
        .transpose()
}

fn get_bool(kvs: &Section, key: &str) -> Result<Option<bool>, ConfigError> {
    kvs.get(key)
        .map(|v| parse_bool(v).ok_or_else(|| invalid(key, v)))
        .transpose()
}

fn get_subnet(kvs: &Section, key: &str) -> Result<Option<u16>, ConfigError> {
    match get_parsed::<u16>(kvs, key)? {
        Some(s) if s > osd_core::constants::DIADDR_SUBNET_MAX => {
            Err(invalid(key, &s.to_string()))
        }
        other => Ok(other),
    }
}

fn build_hostctrl_section(kvs: &Section) -> Result<HostControllerConfig, ConfigError> {
    let mut section = HostControllerConfig::default();
    if let Some(v) = kvs.get("listen") {
        section.listen = v.strip_prefix("tcp://").unwrap_or(v).to_string();
    }
    section.subnet = get_subnet(kvs, "subnet")?.unwrap_or(DEFAULT_SUBNET);
    Ok(section)
}

fn build_gateway_section(kvs: &Section) -> Result<GatewaySection, ConfigError> {
    let mut section = GatewaySection::default();
    if let Some(v) = kvs.get("hostctrl") {
        section.hostctrl = v.clone();
    }
    if let Some(s) = get_subnet(kvs, "subnet")? {
        section.subnet = s;
    }
    if let Some(v) = kvs.get("device") {
        section.device = v.parse().map_err(|_| invalid("device", v))?;
    }
    if let Some(v) = kvs.get("device_address") {
        section.device_address = v.clone();
    }
    if let Some(v) = kvs.get("serial_port") {
        section.serial.path = v.clone();
    }
    if let Some(baud) = get_parsed(kvs, "serial_speed")? {
        section.serial.baud = baud;
    }
    if let Some(b) = get_bool(kvs, "print_stats")? {
        section.print_stats = b;
    }
    Ok(section)
}

fn build_client_section(kvs: &Section) -> Result<ClientSection, ConfigError> {
    let mut section = ClientSection::default();
    if let Some(v) = kvs.get("hostctrl") {
        section.hostctrl = v.clone();
    }
    if let Some(ms) = get_parsed::<u64>(kvs, "timeout_ms")? {
        section.timeout = Duration::from_millis(ms);
    }
    Ok(section)
}

fn build_logging_section(kvs: &Section) -> Result<LoggingSection, ConfigError> {
    let mut section = LoggingSection::default();
    if let Some(level) = get_parsed(kvs, "loglevel")? {
        section.loglevel = level;
    }
    Ok(section)
}
