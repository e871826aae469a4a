//! The host controller bus.
//!
//! Host modules and gateways talk to the host controller over a link
//! carrying frames. A frame holds one [`Message`]: a management request or
//! reply (`M`), or a data packet (`D`).

pub mod frame;
pub mod memory;
pub mod tcp;

use std::fmt;
use std::io;

use osd_core::{Packet, PacketError};

/// Writable end of a bus link.
///
/// Each implementation wraps a socket or channel plus framing.
pub trait Writer: Send {
    fn send_frame(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Readable end of a bus link. Blocks until a frame arrives.
pub trait Reader: Send {
    /// `Ok(None)` once the link is closed.
    fn recv_frame(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Shuts a link down from any thread, waking a blocked [`Reader`].
pub trait Closer: Send + Sync {
    fn close(&self);
}

/// Both ends of one connection, ready to be split between threads.
pub struct BusLink {
    pub writer: Box<dyn Writer>,
    pub reader: Box<dyn Reader>,
    pub closer: Box<dyn Closer>,
}

/// Opens bus links to a host controller.
pub trait Connector: Send + Sync {
    fn connect(&self) -> io::Result<BusLink>;
    /// Human readable endpoint, for logs.
    fn endpoint(&self) -> String;
}

// =============================================================================
// Message: what travels inside a frame
// =============================================================================

pub const KIND_MGMT: u8 = b'M';
pub const KIND_DATA: u8 = b'D';

pub const MGMT_DIADDR_REQUEST: &str = "DIADDR_REQUEST";
pub const MGMT_DIADDR_RELEASE: &str = "DIADDR_RELEASE";
pub const MGMT_GW_REGISTER: &str = "GW_REGISTER";
pub const MGMT_GW_UNREGISTER: &str = "GW_UNREGISTER";
pub const MGMT_ACK: &str = "ACK";
pub const MGMT_NACK: &str = "NACK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Mgmt(String),
    Data(Packet),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    Empty,
    UnknownKind(u8),
    NotUtf8,
    Packet(PacketError),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::Empty => write!(f, "empty message"),
            MessageError::UnknownKind(k) => write!(f, "unknown message kind {:#04x}", k),
            MessageError::NotUtf8 => write!(f, "management message is not UTF-8"),
            MessageError::Packet(e) => write!(f, "invalid data packet: {}", e),
        }
    }
}

impl std::error::Error for MessageError {}

impl Message {
    pub fn mgmt(text: impl Into<String>) -> Self {
        Message::Mgmt(text.into())
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Mgmt(text) => {
                let mut out = Vec::with_capacity(1 + text.len());
                out.push(KIND_MGMT);
                out.extend_from_slice(text.as_bytes());
                out
            }
            Message::Data(pkg) => {
                let mut out = Vec::with_capacity(1 + pkg.sizeof_bytes());
                out.push(KIND_DATA);
                out.extend_from_slice(&pkg.to_le_bytes());
                out
            }
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Message, MessageError> {
        let (&kind, body) = frame.split_first().ok_or(MessageError::Empty)?;
        match kind {
            KIND_MGMT => std::str::from_utf8(body)
                .map(|s| Message::Mgmt(s.to_string()))
                .map_err(|_| MessageError::NotUtf8),
            KIND_DATA => Packet::from_le_bytes(body)
                .map(Message::Data)
                .map_err(MessageError::Packet),
            other => Err(MessageError::UnknownKind(other)),
        }
    }
}

/// Encode and send one message.
pub fn send_message(writer: &mut dyn Writer, msg: &Message) -> io::Result<()> {
    writer.send_frame(&msg.encode())
}

/// Block for the next message; `Ok(None)` once the link is closed.
pub fn recv_message(reader: &mut dyn Reader) -> io::Result<Option<Message>> {
    match reader.recv_frame()? {
        Some(frame) => Message::decode(&frame)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        None => Ok(None),
    }
}
