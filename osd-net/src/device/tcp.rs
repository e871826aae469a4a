//! Device link over TCP, e.g. the debug port of a simulation.

use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};

use super::dtd::{DtdReader, DtdWriter};
use super::{DeviceLink, DeviceOpener};
use crate::bus::tcp::TcpCloser;
use crate::error::{OsdError, Result};

/// Default debug port of simulations.
pub const DEFAULT_PORT: u16 = 23000;

#[derive(Debug, Clone)]
pub struct TcpDevice {
    address: String,
}

impl TcpDevice {
    pub fn new(address: impl Into<String>) -> Self {
        TcpDevice { address: address.into() }
    }
}

impl DeviceOpener for TcpDevice {
    fn open(&self) -> Result<DeviceLink> {
        let connect = || -> std::io::Result<TcpStream> {
            let addrs: Vec<_> = self.address.to_socket_addrs()?.collect();
            TcpStream::connect(&addrs[..])
        };
        let stream = connect()
            .map_err(|e| OsdError::ConnectionFailed(format!("{}: {}", self.address, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("set_nodelay failed: {}", e);
        }
        let writer = DtdWriter::new(stream.try_clone()?);
        let closer = TcpCloser { stream: stream.try_clone()? };
        Ok(DeviceLink {
            reader: Box::new(DtdReader::new(BufReader::new(stream))),
            writer: Box::new(writer),
            closer: Box::new(closer),
        })
    }

    fn name(&self) -> String {
        format!("tcp://{}", self.address)
    }
}
