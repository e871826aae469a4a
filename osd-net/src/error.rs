//! Error type shared by host modules, gateways and client decoders.

use std::io;

use osd_core::{ModuleDescriptor, ProtocolViolation};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OsdError {
    #[error("operation failed: {0}")]
    Failure(String),
    #[error("device reported an error")]
    DeviceError,
    #[error("device returned invalid data: {0}")]
    DeviceInvalidData(String),
    #[error("communication error: {0}")]
    Com(String),
    #[error("operation timed out")]
    TimedOut,
    #[error("not connected")]
    NotConnected,
    #[error("only {} modules could be described completely", .0.len())]
    PartialResult(Vec<ModuleDescriptor>),
    #[error("operation aborted")]
    Aborted,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("file error: {0}")]
    File(String),
    #[error("memory verification failed")]
    MemVerifyFailed,
    #[error("module at {0:#06x} is not of the expected type")]
    WrongModule(u16),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl OsdError {
    /// Numeric result code of the OSD C API (`0` is success).
    pub fn code(&self) -> i32 {
        match self {
            OsdError::Failure(_) | OsdError::Protocol(_) => -1,
            OsdError::DeviceError => -2,
            OsdError::DeviceInvalidData(_) => -3,
            OsdError::Com(_) | OsdError::Io(_) => -4,
            OsdError::TimedOut => -5,
            OsdError::NotConnected => -6,
            OsdError::PartialResult(_) => -7,
            OsdError::Aborted => -8,
            OsdError::ConnectionFailed(_) => -9,
            OsdError::File(_) => -12,
            OsdError::MemVerifyFailed => -13,
            OsdError::WrongModule(_) => -14,
        }
    }

    /// Errors after which the connection can not be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OsdError::NotConnected | OsdError::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, OsdError>;
