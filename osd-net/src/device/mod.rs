//! Device links: the transport between a gateway and the chip (or its
//! simulation).
//!
//! Packets travel as Debug Transport Datagrams, see [`dtd`].

pub mod dtd;
pub mod serial;
pub mod tcp;

use osd_core::Packet;

use crate::bus::Closer;
use crate::error::Result;

/// Reads packets from a device. Blocks until one arrives.
pub trait DeviceReader: Send {
    /// [`crate::OsdError::NotConnected`] once the device is gone; any other
    /// error leaves the link usable.
    fn read_packet(&mut self) -> Result<Packet>;
}

/// Writes packets to a device.
pub trait DeviceWriter: Send {
    fn write_packet(&mut self, pkg: &Packet) -> Result<()>;
}

/// An open device connection.
pub struct DeviceLink {
    pub reader: Box<dyn DeviceReader>,
    pub writer: Box<dyn DeviceWriter>,
    pub closer: Box<dyn Closer>,
}

/// Opens a device connection.
pub trait DeviceOpener: Send + Sync {
    fn open(&self) -> Result<DeviceLink>;
    /// Human readable device name, for logs.
    fn name(&self) -> String;
}
