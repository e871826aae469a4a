//! Debug Transport Datagram (DTD) framing.
//!
//! ```text
//! [u16 number of packet words][packet words...]
//! ```
//! Every word is big-endian on the link.

use std::io::{self, Read, Write};

use osd_core::Packet;

use super::{DeviceReader, DeviceWriter};
use crate::error::{OsdError, Result};

pub fn encode(pkg: &Packet) -> Vec<u8> {
    let words = pkg.words();
    let mut out = Vec::with_capacity(2 + 2 * words.len());
    out.extend_from_slice(&(words.len() as u16).to_be_bytes());
    for w in words {
        out.extend_from_slice(&w.to_be_bytes());
    }
    out
}

fn link_error(e: io::Error) -> OsdError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected => OsdError::NotConnected,
        _ => OsdError::Com(e.to_string()),
    }
}

/// [`DeviceReader`] decoding DTDs from a byte stream.
pub struct DtdReader<R> {
    inner: R,
}

impl<R: Read + Send> DtdReader<R> {
    pub fn new(inner: R) -> Self {
        DtdReader { inner }
    }
}

impl<R: Read + Send> DeviceReader for DtdReader<R> {
    fn read_packet(&mut self) -> Result<Packet> {
        let mut len = [0u8; 2];
        self.inner.read_exact(&mut len).map_err(link_error)?;
        let data_words = u16::from_be_bytes(len) as usize;

        let mut raw = vec![0u8; data_words * 2];
        self.inner.read_exact(&mut raw).map_err(link_error)?;
        let words = raw
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();

        Packet::from_words(words)
            .map_err(|e| OsdError::DeviceInvalidData(format!("DTD of {} words: {}", data_words, e)))
    }
}

/// [`DeviceWriter`] encoding DTDs onto a byte stream.
pub struct DtdWriter<W> {
    inner: W,
}

impl<W: Write + Send> DtdWriter<W> {
    pub fn new(inner: W) -> Self {
        DtdWriter { inner }
    }
}

impl<W: Write + Send> DeviceWriter for DtdWriter<W> {
    fn write_packet(&mut self, pkg: &Packet) -> Result<()> {
        self.inner.write_all(&encode(pkg)).map_err(link_error)?;
        self.inner.flush().map_err(link_error)
    }
}
