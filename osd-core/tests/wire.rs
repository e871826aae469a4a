//! Wire-level properties of osd-core, checked across the public API.

use osd_core::constants::{EV_CONT, EV_LAST, EV_OVERFLOW, HEADER_WORDS, REQ_WRITE_REG_16};
use osd_core::decoder::ctm::{self, CtmDesc};
use osd_core::decoder::stm::{self, StmDesc};
use osd_core::packet::{data2payload, payload2data};
use osd_core::{diaddr, Packet, PacketType};

#[test]
fn header_fields_are_bit_exact() {
    let mut pkg = Packet::new(0);
    pkg.set_header(5, 3, PacketType::Event, 7);
    assert_eq!(pkg.dest(), 5);
    assert_eq!(pkg.src(), 3);
    assert_eq!(pkg.packet_type(), PacketType::Event);
    assert_eq!(pkg.type_sub(), 7);

    // every type and subtype survives next to extreme addresses
    for ty in [PacketType::Reg, PacketType::Res1, PacketType::Event, PacketType::Res2] {
        for sub in 0..16u8 {
            pkg.set_header(0xffff, 0, ty, sub);
            assert_eq!((pkg.dest(), pkg.src()), (0xffff, 0));
            assert_eq!((pkg.packet_type(), pkg.type_sub()), (ty, sub));
        }
    }
}

#[test]
fn bus_encoding_round_trips() {
    let payload: Vec<u16> = (0..40).map(|i| i * 0x0101).collect();
    let pkg = Packet::with_payload(0x0405, 0x0401, PacketType::Event, EV_CONT, &payload);
    let decoded = Packet::from_le_bytes(&pkg.to_le_bytes()).unwrap();
    assert_eq!(decoded, pkg);
    assert_eq!(decoded.payload(), &payload[..]);
}

#[test]
fn truncated_packets_are_rejected() {
    assert!(Packet::from_words(vec![1, 2]).is_err());
    assert!(Packet::from_le_bytes(&[1, 0, 2, 0, 3]).is_err());
    assert!(Packet::from_words(vec![1, 2, 3]).is_ok());
}

#[test]
fn size_conversions_are_inverse() {
    for n in 0..=64 {
        assert_eq!(data2payload(payload2data(n)), n);
        assert_eq!(payload2data(n), n + HEADER_WORDS);
    }
}

#[test]
fn register_write_request_layout() {
    let pkg = Packet::with_payload(0x05, 0x10, PacketType::Reg, REQ_WRITE_REG_16, &[0x200, 1]);
    assert_eq!(pkg.words(), &[0x0005, 0x0010, (0b00 << 14) | (0b0100 << 10), 0x0200, 0x0001]);
}

#[test]
fn overflow_events_decode_to_count_only() {
    let pkg = Packet::with_payload(0x10, 0x0405, PacketType::Event, EV_OVERFLOW, &[42]);
    let ev = stm::decode(&StmDesc { diaddr: 0x0405, valwidth: 32 }, pkg.clone()).unwrap();
    assert_eq!(ev.overflow, 42);
    assert_eq!((ev.timestamp, ev.id, ev.value), (0, 0, 0));
    assert!(!ev.is_print_event());

    let desc = CtmDesc {
        diaddr: 0x0405,
        addr_width: 64,
        data_width: 64,
    };
    let ev = ctm::decode(&desc, pkg).unwrap();
    assert_eq!(ev.overflow, 42);
    assert_eq!((ev.npc, ev.pc), (0, 0));
}

#[test]
fn split_event_combines_to_full_record() {
    let desc = CtmDesc {
        diaddr: 0x0406,
        addr_width: 64,
        data_width: 64,
    };
    // 32 + 2 * 64 + 5 bits
    assert_eq!(ctm::expected_payload_words(64), 11);

    let words: Vec<u16> = vec![1, 0, 0xa, 0xb, 0xc, 0xd, 0x1, 0x2, 0x3, 0x4, 0b00100];
    let mut head = Packet::with_payload(0x10, 0x0406, PacketType::Event, EV_CONT, &words[..5]);
    let tail = Packet::with_payload(0x10, 0x0406, PacketType::Event, EV_LAST, &words[5..]);
    head.combine(&tail);

    let ev = ctm::decode(&desc, head).unwrap();
    assert_eq!(ev.timestamp, 1);
    assert_eq!(ev.npc, 0x000d_000c_000b_000a);
    assert_eq!(ev.pc, 0x0004_0003_0002_0001);
    assert!(ev.is_ret);
}

#[test]
fn diaddr_partitions_subnets() {
    for subnet in [0, 1, 5, 63] {
        for local in [0, 1, 512, 1023] {
            let addr = diaddr::build(subnet, local);
            assert_eq!(diaddr::subnet(addr), subnet);
            assert_eq!(diaddr::local(addr), local);
        }
        assert_eq!(diaddr::local(diaddr::scm(subnet)), 0);
    }
}
