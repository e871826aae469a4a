//! Gateway: makes the modules of a device subnet reachable on the host
//! controller bus.
//!
//! Two threads forward packets, one per direction, so a stall on one side
//! does not block the other:
//! - device to bus: read a packet from the device, send it to the host
//!   controller. A lost device ends the flow; other read errors are retried
//!   after a short pause, and too many in a row count as a lost device.
//! - bus to device: packets routed to this subnet are written to the device.
//!   A failed write ends the flow.
//!
//! Both directions only share the atomic transfer counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use osd_core::constants::DIADDR_SUBNET_MAX;

use crate::bus::{self, Closer, Connector, Message, Reader, Writer};
use crate::device::{DeviceOpener, DeviceReader, DeviceWriter};
use crate::error::{OsdError, Result};

/// Pause between retries of a failed device read.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Consecutive failed device reads after which the device is given up.
const MAX_READ_ERRORS: u32 = 50;

/// Transfer counters, updated by the forwarding threads.
#[derive(Debug, Default)]
pub struct TransferStats {
    connect_time: AtomicU64,
    bytes_from_device: AtomicU64,
    bytes_to_device: AtomicU64,
}

/// A copy of [`TransferStats`] at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct TransferStatsSnapshot {
    /// UNIX time of the last connect, in seconds.
    pub connect_time: u64,
    pub bytes_from_device: u64,
    pub bytes_to_device: u64,
}

impl TransferStats {
    fn reset(&self, now: u64) {
        self.connect_time.store(now, Ordering::Relaxed);
        self.bytes_from_device.store(0, Ordering::Relaxed);
        self.bytes_to_device.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransferStatsSnapshot {
        TransferStatsSnapshot {
            connect_time: self.connect_time.load(Ordering::Relaxed),
            bytes_from_device: self.bytes_from_device.load(Ordering::Relaxed),
            bytes_to_device: self.bytes_to_device.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct LinkState {
    hostctrl: AtomicBool,
    device: AtomicBool,
    device_disconnect_detected: AtomicBool,
}

pub struct Gateway {
    connector: Box<dyn Connector>,
    device: Box<dyn DeviceOpener>,
    subnet: u16,
    stats: Arc<TransferStats>,
    flags: Arc<LinkState>,
    bus_writer: Arc<Mutex<Box<dyn Writer>>>,
    bus_closer: Option<Box<dyn Closer>>,
    device_closer: Option<Box<dyn Closer>>,
    threads: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Create a disconnected gateway for device subnet `subnet`.
    pub fn new(
        connector: impl Connector + 'static,
        subnet: u16,
        device: impl DeviceOpener + 'static,
    ) -> Self {
        assert!(subnet <= DIADDR_SUBNET_MAX, "subnet {} out of range", subnet);
        Gateway {
            connector: Box::new(connector),
            device: Box::new(device),
            subnet,
            stats: Arc::new(TransferStats::default()),
            flags: Arc::new(LinkState::default()),
            bus_writer: Arc::new(Mutex::new(Box::new(NullWriter))),
            bus_closer: None,
            device_closer: None,
            threads: Vec::new(),
        }
    }

    pub fn subnet(&self) -> u16 {
        self.subnet
    }

    /// Register with the host controller, open the device and start
    /// forwarding.
    pub fn connect(&mut self) -> Result<()> {
        if self.bus_closer.is_some() || self.device_closer.is_some() {
            self.disconnect()?;
        }
        let endpoint = self.connector.endpoint();
        let mut link = self
            .connector
            .connect()
            .map_err(|e| OsdError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;

        let registered = management_request(
            link.writer.as_mut(),
            link.reader.as_mut(),
            &format!("{} {}", bus::MGMT_GW_REGISTER, self.subnet),
        );
        match registered {
            Ok(true) => {}
            Ok(false) => {
                link.closer.close();
                return Err(OsdError::ConnectionFailed(format!(
                    "host controller refused gateway for subnet {}",
                    self.subnet
                )));
            }
            Err(e) => {
                link.closer.close();
                return Err(e);
            }
        }
        log::debug!("registered as gateway for subnet {} at {}", self.subnet, endpoint);

        let device = match self.device.open() {
            Ok(d) => d,
            Err(e) => {
                let msg = Message::mgmt(format!("{} {}", bus::MGMT_GW_UNREGISTER, self.subnet));
                let _ = bus::send_message(link.writer.as_mut(), &msg);
                link.closer.close();
                return Err(e);
            }
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.stats.reset(now);
        self.flags.device_disconnect_detected.store(false, Ordering::SeqCst);
        self.flags.hostctrl.store(true, Ordering::SeqCst);
        self.flags.device.store(true, Ordering::SeqCst);
        *self.bus_writer.lock().unwrap_or_else(PoisonError::into_inner) = link.writer;

        let rx = {
            let bus_writer = self.bus_writer.clone();
            let stats = self.stats.clone();
            let flags = self.flags.clone();
            let reader = device.reader;
            thread::Builder::new()
                .name(format!("gateway-{}-device-rx", self.subnet))
                .spawn(move || device_to_bus(reader, bus_writer, stats, flags))?
        };
        let tx = {
            let stats = self.stats.clone();
            let flags = self.flags.clone();
            let reader = link.reader;
            let writer = device.writer;
            thread::Builder::new()
                .name(format!("gateway-{}-device-tx", self.subnet))
                .spawn(move || bus_to_device(reader, writer, stats, flags))?
        };
        self.threads = vec![rx, tx];
        self.bus_closer = Some(link.closer);
        self.device_closer = Some(device.closer);

        log::info!(
            "gateway for subnet {} connected: {} <-> {}",
            self.subnet,
            self.device.name(),
            endpoint
        );
        Ok(())
    }

    /// Stop both flows and close both ends.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(closer) = self.device_closer.take() {
            closer.close();
        }
        if let Some(closer) = self.bus_closer.take() {
            let msg = Message::mgmt(format!("{} {}", bus::MGMT_GW_UNREGISTER, self.subnet));
            {
                let mut w = self.bus_writer.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = bus::send_message(w.as_mut(), &msg) {
                    log::debug!("unable to unregister gateway: {}", e);
                }
                *w = Box::new(NullWriter);
            }
            closer.close();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.flags.hostctrl.store(false, Ordering::SeqCst);
        self.flags.device.store(false, Ordering::SeqCst);
        log::info!("gateway for subnet {} disconnected", self.subnet);
        Ok(())
    }

    /// `true` while both the host controller and the device are connected.
    pub fn is_connected(&self) -> bool {
        self.flags.hostctrl.load(Ordering::SeqCst)
            && self.flags.device.load(Ordering::SeqCst)
            && !self.device_disconnect_detected()
    }

    /// A forwarding flow found the device gone.
    pub fn device_disconnect_detected(&self) -> bool {
        self.flags.device_disconnect_detected.load(Ordering::SeqCst)
    }

    pub fn transfer_stats(&self) -> TransferStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if self.bus_closer.is_some() || self.device_closer.is_some() {
            let _ = self.disconnect();
        }
    }
}

/// Bus writer of a disconnected gateway.
struct NullWriter;

impl Writer for NullWriter {
    fn send_frame(&mut self, _data: &[u8]) -> std::io::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "gateway disconnected"))
    }
}

/// Send a management request and wait for ACK (`true`) or NACK (`false`).
fn management_request(writer: &mut dyn Writer, reader: &mut dyn Reader, request: &str) -> Result<bool> {
    bus::send_message(writer, &Message::mgmt(request))
        .map_err(|e| OsdError::ConnectionFailed(e.to_string()))?;
    loop {
        match bus::recv_message(reader).map_err(|e| OsdError::ConnectionFailed(e.to_string()))? {
            Some(Message::Mgmt(reply)) => return Ok(reply == bus::MGMT_ACK),
            Some(Message::Data(pkg)) => {
                log::warn!("dropping data packet before registration: {:?}", pkg)
            }
            None => {
                return Err(OsdError::ConnectionFailed(
                    "host controller closed the connection".into(),
                ))
            }
        }
    }
}

fn device_to_bus(
    mut reader: Box<dyn DeviceReader>,
    bus_writer: Arc<Mutex<Box<dyn Writer>>>,
    stats: Arc<TransferStats>,
    flags: Arc<LinkState>,
) {
    let mut errors = 0;
    loop {
        let pkg = match reader.read_packet() {
            Ok(p) => {
                errors = 0;
                p
            }
            Err(OsdError::NotConnected) => {
                log::debug!("connection to device terminated during read");
                flags.device.store(false, Ordering::SeqCst);
                flags.device_disconnect_detected.store(true, Ordering::SeqCst);
                return;
            }
            Err(e) => {
                errors += 1;
                if errors >= MAX_READ_ERRORS {
                    log::error!("device read failed {} times in a row, giving up: {}", errors, e);
                    flags.device.store(false, Ordering::SeqCst);
                    flags.device_disconnect_detected.store(true, Ordering::SeqCst);
                    return;
                }
                log::warn!("device read failed: {}. Trying again.", e);
                thread::sleep(READ_RETRY_DELAY);
                continue;
            }
        };
        let len = pkg.sizeof_bytes() as u64;
        let sent = {
            let mut w = bus_writer.lock().unwrap_or_else(PoisonError::into_inner);
            bus::send_message(w.as_mut(), &Message::Data(pkg))
        };
        match sent {
            Ok(()) => {
                stats.bytes_from_device.fetch_add(len, Ordering::Relaxed);
            }
            Err(e) => {
                log::warn!("forwarding to host controller failed: {}", e);
                flags.hostctrl.store(false, Ordering::SeqCst);
                return;
            }
        }
    }
}

fn bus_to_device(
    mut reader: Box<dyn Reader>,
    mut writer: Box<dyn DeviceWriter>,
    stats: Arc<TransferStats>,
    flags: Arc<LinkState>,
) {
    loop {
        let msg = match bus::recv_message(reader.as_mut()) {
            Ok(Some(m)) => m,
            Ok(None) => break,
            Err(e) => {
                log::warn!("host controller read failed: {}", e);
                break;
            }
        };
        match msg {
            Message::Data(pkg) => match writer.write_packet(&pkg) {
                Ok(()) => {
                    stats
                        .bytes_to_device
                        .fetch_add(pkg.sizeof_bytes() as u64, Ordering::Relaxed);
                }
                Err(OsdError::NotConnected) => {
                    log::debug!("connection to device terminated during write");
                    flags.device.store(false, Ordering::SeqCst);
                    flags.device_disconnect_detected.store(true, Ordering::SeqCst);
                    return;
                }
                Err(e) => {
                    log::error!("device write failed ({}), packet dropped", e);
                    flags.device_disconnect_detected.store(true, Ordering::SeqCst);
                    return;
                }
            },
            Message::Mgmt(text) => log::debug!("management message: {}", text),
        }
    }
    flags.hostctrl.store(false, Ordering::SeqCst);
}
