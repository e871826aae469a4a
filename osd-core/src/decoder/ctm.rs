//! Core Trace Module (CTM) events.

use super::{expect_event, expect_payload, words_le, ProtocolViolation};
use crate::constants::EV_OVERFLOW;
use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtmDesc {
    pub diaddr: u16,
    pub addr_width: u16,
    pub data_width: u16,
}

/// One decoded core trace event. With `overflow != 0` only `overflow` is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtmEvent {
    pub timestamp: u32,
    pub npc: u64,
    pub pc: u64,
    pub mode: u8,
    pub is_ret: bool,
    pub is_call: bool,
    pub is_modechange: bool,
    pub overflow: u16,
}

/// Payload words of a regular event: timestamp, npc, pc and the flag bits.
pub fn expected_payload_words(addr_width: u16) -> usize {
    (32 + 2 * addr_width as usize + 2 + 1 + 1 + 1).div_ceil(16)
}

pub fn decode(desc: &CtmDesc, pkg: Packet) -> Result<CtmEvent, ProtocolViolation> {
    expect_event(&pkg)?;

    if pkg.type_sub() == EV_OVERFLOW {
        expect_payload("CTM", &pkg, 1)?;
        return Ok(CtmEvent {
            overflow: pkg.payload()[0],
            ..Default::default()
        });
    }

    expect_payload("CTM", &pkg, expected_payload_words(desc.addr_width))?;
    let p = pkg.payload();
    let aw = desc.addr_width as usize / 16;

    let mut w = 0;
    let timestamp = (u32::from(p[w + 1]) << 16) | u32::from(p[w]);
    w += 2;
    let npc = words_le(&p[w..w + aw]);
    w += aw;
    let pc = words_le(&p[w..w + aw]);
    w += aw;
    let flags = p[w];

    Ok(CtmEvent {
        timestamp,
        npc,
        pc,
        mode: (flags & 0x3) as u8,
        is_ret: flags >> 2 & 1 == 1,
        is_call: flags >> 3 & 1 == 1,
        is_modechange: flags >> 4 & 1 == 1,
        overflow: 0,
    })
}
