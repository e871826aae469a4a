//! System Trace Module (STM) events.

use alloc::string::String;

use super::{expect_event, expect_payload, words_le, ProtocolViolation};
use crate::constants::{EV_OVERFLOW, STM_PRINT_EVENT_ID};
use crate::packet::Packet;

/// Static properties of one STM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmDesc {
    pub diaddr: u16,
    /// Width of the event value in bits (16, 32 or 64)
    pub valwidth: u16,
}

/// One decoded trace event. With `overflow != 0` only `overflow` is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StmEvent {
    pub timestamp: u32,
    pub id: u16,
    pub value: u64,
    pub overflow: u16,
}

impl StmEvent {
    /// Software print: one character in `value`.
    pub fn is_print_event(&self) -> bool {
        self.overflow == 0 && self.id == STM_PRINT_EVENT_ID
    }
}

/// Payload words of a regular event: timestamp, id and value.
pub fn expected_payload_words(valwidth: u16) -> usize {
    (32 + 16 + valwidth as usize).div_ceil(16)
}

/// Decode one event packet, consuming it.
pub fn decode(desc: &StmDesc, pkg: Packet) -> Result<StmEvent, ProtocolViolation> {
    expect_event(&pkg)?;

    if pkg.type_sub() == EV_OVERFLOW {
        expect_payload("STM", &pkg, 1)?;
        return Ok(StmEvent {
            overflow: pkg.payload()[0],
            ..Default::default()
        });
    }

    expect_payload("STM", &pkg, expected_payload_words(desc.valwidth))?;
    let p = pkg.payload();
    let value_words = desc.valwidth as usize / 16;
    Ok(StmEvent {
        timestamp: (u32::from(p[1]) << 16) | u32::from(p[0]),
        id: p[2],
        value: words_le(&p[3..3 + value_words]),
        overflow: 0,
    })
}

/// Collects print events until a newline completes a line.
#[derive(Debug, Default)]
pub struct PrintBuffer {
    buf: String,
}

impl PrintBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the character of a print event.
    ///
    /// Returns the buffered line (newline included) once it is complete.
    pub fn add(&mut self, ev: &StmEvent) -> Result<Option<String>, ProtocolViolation> {
        if ev.value > u64::from(u8::MAX) {
            return Err(ProtocolViolation::PrintValue(ev.value));
        }
        let c = char::from(ev.value as u8);
        self.buf.push(c);
        if c == '\n' {
            return Ok(Some(core::mem::take(&mut self.buf)));
        }
        Ok(None)
    }

    /// Characters received since the last complete line.
    pub fn pending(&self) -> &str {
        &self.buf
    }
}
