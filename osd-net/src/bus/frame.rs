//! Length-prefixed framing for bus streams.
//!
//! Each frame is `[u32 big-endian body length][body]`.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};

use super::Reader;

/// Largest body accepted: kind byte plus a maximum size packet.
pub const MAX_FRAME_LEN: usize = 1 + 2 * osd_core::constants::MAX_DATA_WORDS;

const LEN_PREFIX: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    TooLong(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooLong(len) => write!(f, "frame of {} bytes exceeds limit", len),
        }
    }
}

impl std::error::Error for FrameError {}

pub fn encode(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_PREFIX + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Streaming frame decoder.
///
/// Accumulates bytes via `feed()` and yields complete frame bodies.
pub struct Decoder {
    buffer: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder { buffer: Vec::new() }
    }

    /// Feed raw bytes and return all frames completed by them.
    ///
    /// A length above [`MAX_FRAME_LEN`] means the stream is out of sync;
    /// the decoder can not recover from that.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            if self.buffer.len() < LEN_PREFIX {
                break;
            }
            let len = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;
            if len > MAX_FRAME_LEN {
                return Err(FrameError::TooLong(len));
            }
            if self.buffer.len() < LEN_PREFIX + len {
                break; // wait for more data
            }
            frames.push(self.buffer[LEN_PREFIX..LEN_PREFIX + len].to_vec());
            self.buffer.drain(..LEN_PREFIX + len);
        }

        Ok(frames)
    }

    /// Bytes of an incomplete frame still buffered.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Reader`] over any byte stream.
pub struct StreamReader<R> {
    inner: R,
    decoder: Decoder,
    ready: VecDeque<Vec<u8>>,
}

impl<R: Read + Send> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        StreamReader {
            inner,
            decoder: Decoder::new(),
            ready: VecDeque::new(),
        }
    }
}

impl<R: Read + Send> Reader for StreamReader<R> {
    fn recv_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            let n = match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            let frames = self
                .decoder
                .feed(&buf[..n])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.ready.extend(frames);
        }
    }
}
