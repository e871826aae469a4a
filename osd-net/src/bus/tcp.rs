//! Bus links over TCP.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use super::frame::{self, StreamReader};
use super::{BusLink, Closer, Connector, Writer};

/// Writer that sends length-framed data over a TCP stream.
struct TcpWriter {
    stream: TcpStream,
}

impl Writer for TcpWriter {
    fn send_frame(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(&frame::encode(data))
    }
}

pub(crate) struct TcpCloser {
    pub(crate) stream: TcpStream,
}

impl Closer for TcpCloser {
    fn close(&self) {
        // NotConnected if the peer already went away
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Split a connected stream into a [`BusLink`].
pub fn link_from_stream(stream: TcpStream) -> io::Result<BusLink> {
    if let Err(e) = stream.set_nodelay(true) {
        log::warn!("set_nodelay failed: {}", e);
    }
    let writer = TcpWriter { stream: stream.try_clone()? };
    let closer = TcpCloser { stream: stream.try_clone()? };
    Ok(BusLink {
        writer: Box::new(writer),
        reader: Box::new(StreamReader::new(stream)),
        closer: Box::new(closer),
    })
}

/// Connects to a host controller listening on a TCP address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// `address` is `host:port`, optionally prefixed with `tcp://`.
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let address = match address.strip_prefix("tcp://") {
            Some(rest) => rest.to_string(),
            None => address,
        };
        TcpConnector { address }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> io::Result<BusLink> {
        let addrs: Vec<_> = self.address.to_socket_addrs()?.collect();
        let stream = TcpStream::connect(&addrs[..])?;
        link_from_stream(stream)
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.address)
    }
}
