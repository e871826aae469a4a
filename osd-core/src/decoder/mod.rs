//! Decoders for module specific event packets.
//!
//! Each decoder takes a descriptor read once from the module (carrying the
//! field widths) and turns raw EVENT packets into typed records. A packet
//! that does not match the layout announced by the descriptor is a
//! [`ProtocolViolation`]: the peer broke the protocol, retrying won't help.

pub mod ctm;
pub mod dem_uart;
pub mod stm;

use core::fmt;

use crate::packet::{Packet, PacketType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A non-EVENT packet was handed to an event decoder.
    NotAnEvent(PacketType),
    /// Event payload size does not match the descriptor.
    PayloadSize {
        module: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A width register holds something other than 16, 32 or 64.
    InvalidWidth { register: &'static str, value: u16 },
    /// An STM print event carries a value that is not a byte.
    PrintValue(u64),
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::NotAnEvent(ty) => {
                write!(f, "Expected an EVENT packet, got {}", ty.name())
            }
            ProtocolViolation::PayloadSize { module, expected, actual } => write!(
                f,
                "{} protocol violation: expected {} payload words, got {}",
                module, expected, actual
            ),
            ProtocolViolation::InvalidWidth { register, value } => {
                write!(f, "{} register has an invalid value: {}", register, value)
            }
            ProtocolViolation::PrintValue(v) => {
                write!(f, "Print event value {:#x} is not a character", v)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ProtocolViolation {}

/// Accept only the register widths modules are allowed to report.
pub fn check_width(register: &'static str, value: u16) -> Result<u16, ProtocolViolation> {
    match value {
        16 | 32 | 64 => Ok(value),
        _ => Err(ProtocolViolation::InvalidWidth { register, value }),
    }
}

fn expect_event(pkg: &Packet) -> Result<(), ProtocolViolation> {
    match pkg.packet_type() {
        PacketType::Event => Ok(()),
        other => Err(ProtocolViolation::NotAnEvent(other)),
    }
}

fn expect_payload(
    module: &'static str,
    pkg: &Packet,
    expected: usize,
) -> Result<(), ProtocolViolation> {
    let actual = pkg.payload_size_words();
    if actual != expected {
        return Err(ProtocolViolation::PayloadSize { module, expected, actual });
    }
    Ok(())
}

/// Combine `words` little-endian (word 0 least significant).
fn words_le(words: &[u16]) -> u64 {
    words
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &w)| acc | (u64::from(w) << (i * 16)))
}
