//! Device Emulation Module UART (DEM-UART): one character per event packet.

use super::{expect_event, ProtocolViolation};
use crate::constants::EV_LAST;
use crate::packet::{Packet, PacketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemUartDesc {
    pub diaddr: u16,
}

/// The character carried by a DEM-UART event.
pub fn decode(pkg: Packet) -> Result<u8, ProtocolViolation> {
    expect_event(&pkg)?;
    let word = pkg.payload().first().copied().ok_or(ProtocolViolation::PayloadSize {
        module: "DEM-UART",
        expected: 1,
        actual: 0,
    })?;
    Ok((word & 0xff) as u8)
}

/// Event packet sending `c` from `src` to the UART at `desc`.
pub fn encode(desc: &DemUartDesc, src: u16, c: u8) -> Packet {
    Packet::with_payload(desc.diaddr, src, PacketType::Event, EV_LAST, &[u16::from(c)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_low_byte() {
        let pkg = Packet::with_payload(1, 2, PacketType::Event, EV_LAST, &[0x1241]);
        assert_eq!(decode(pkg), Ok(b'A'));
    }

    #[test]
    fn decode_empty_payload() {
        let pkg = Packet::with_payload(1, 2, PacketType::Event, EV_LAST, &[]);
        assert_eq!(
            decode(pkg),
            Err(ProtocolViolation::PayloadSize {
                module: "DEM-UART",
                expected: 1,
                actual: 0,
            })
        );
    }

    #[test]
    fn decode_uses_first_word() {
        let pkg = Packet::with_payload(1, 2, PacketType::Event, EV_LAST, &[0x0042, 0x0043]);
        assert_eq!(decode(pkg), Ok(b'B'));
    }

    #[test]
    fn encode_character() {
        let pkg = encode(&DemUartDesc { diaddr: 0x0402 }, 0x0401, b'x');
        assert_eq!(pkg.dest(), 0x0402);
        assert_eq!(pkg.src(), 0x0401);
        assert_eq!(pkg.packet_type(), PacketType::Event);
        assert_eq!(pkg.type_sub(), EV_LAST);
        assert_eq!(pkg.payload(), &[u16::from(b'x')]);
    }
}
