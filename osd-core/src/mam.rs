//! Memory Access Module (MAM) transfer encoding.
//!
//! A MAM transfer is a byte stream sent to the module as a series of EVENT
//! packets:
//! ```text
//! byte 0:     HDR0 = WE[7] BURST[6] SYNC[5]
//! byte 1:     HDR1 = burst length in words, or the byte select mask
//! bytes 2..:  address, big-endian, addr_width/8 bytes
//! bytes ..:   write data (writes only)
//! ```
//! Bytes are packed into packet words big-endian: `(b0 << 8) | b1`.

use alloc::vec::Vec;

use crate::constants::{EV_LAST, MAM_MAX_BURST_WORDS};
use crate::packet::{Packet, PacketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MemRegion {
    pub baseaddr: u64,
    pub memsize: u64,
}

/// Memory behind one MAM.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MemDesc {
    pub diaddr: u16,
    pub addr_width_bit: u16,
    pub data_width_bit: u16,
    pub regions: Vec<MemRegion>,
}

impl MemDesc {
    pub fn addr_bytes(&self) -> usize {
        self.addr_width_bit as usize / 8
    }

    pub fn data_bytes(&self) -> usize {
        self.data_width_bit as usize / 8
    }
}

/// Split of an access into an unaligned head, a word aligned body and an
/// unaligned tail, all in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parts {
    pub prolog: usize,
    pub bulk: usize,
    pub epilog: usize,
}

pub fn calculate_parts(start_addr: u64, nbyte: usize, dw_bytes: usize) -> Parts {
    if nbyte < dw_bytes {
        return Parts { prolog: nbyte, bulk: 0, epilog: 0 };
    }
    let dw = dw_bytes as u64;
    let prolog = ((dw - start_addr % dw) % dw) as usize;
    let epilog = ((start_addr + nbyte as u64) % dw) as usize;
    Parts {
        prolog,
        bulk: nbyte - prolog - epilog,
        epilog,
    }
}

/// Byte select mask for `nbyte` bytes starting at byte `baddr` of a word.
pub fn byte_select(baddr: usize, nbyte: usize, dw_bytes: usize) -> u8 {
    assert!(
        baddr + nbyte <= dw_bytes,
        "single-word transfers cannot cross a word boundary"
    );
    let mut bs = 0u8;
    for i in baddr..baddr + nbyte {
        bs |= 1 << i;
    }
    assert!(bs != 0, "empty byte select");
    bs
}

/// Byte ranges `(offset, len)` of the bursts needed for `nbyte` aligned bytes.
pub fn bursts(nbyte: usize, dw_bytes: usize) -> Vec<(usize, usize)> {
    let max = MAM_MAX_BURST_WORDS * dw_bytes;
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < nbyte {
        let len = core::cmp::min(max, nbyte - pos);
        out.push((pos, len));
        pos += len;
    }
    out
}

/// Assemble a transfer request.
///
/// `selsize` is the burst length in words for bursts, the byte select
/// mask for single-word accesses.
pub fn create_transfer(
    desc: &MemDesc,
    we: bool,
    burst: bool,
    sync: bool,
    selsize: u8,
    start_addr: u64,
    data: &[u8],
) -> Vec<u8> {
    let aw = desc.addr_bytes();
    let dw = desc.data_bytes();
    assert!(we == !data.is_empty(), "write data must be given for writes only");
    assert!(data.len() % dw == 0, "only transfers of full words are possible");
    if burst {
        assert!(selsize != 0);
        if we {
            assert_eq!(selsize as usize, data.len() / dw);
        }
    }

    let mut t = Vec::with_capacity(2 + aw + data.len());
    t.push((u8::from(we) << 7) | (u8::from(burst) << 6) | (u8::from(sync) << 5));
    t.push(selsize);
    for i in 0..aw {
        t.push((start_addr >> ((aw - i - 1) * 8)) as u8);
    }
    t.extend_from_slice(data);
    t
}

/// Cut a transfer into EVENT packets of at most `max_words` payload words.
pub fn transfer_packets(desc: &MemDesc, src: u16, transfer: &[u8], max_words: usize) -> Vec<Packet> {
    assert!(transfer.len() % 2 == 0, "transfers are sent in whole words");
    transfer
        .chunks(max_words * 2)
        .map(|chunk| {
            let payload: Vec<u16> = chunk
                .chunks_exact(2)
                .map(|b| (u16::from(b[0]) << 8) | u16::from(b[1]))
                .collect();
            Packet::with_payload(desc.diaddr, src, PacketType::Event, EV_LAST, &payload)
        })
        .collect()
}

/// Unpack read data words big-endian into `out`.
pub fn unpack_words(words: &[u16], out: &mut Vec<u8>) {
    for w in words {
        out.extend_from_slice(&w.to_be_bytes());
    }
}

/// Assemble a 64 bit value from four 16 bit region registers.
pub fn region_value(words: [u16; 4]) -> u64 {
    words
        .iter()
        .enumerate()
        .fold(0u64, |acc, (w, &v)| acc | (u64::from(v) << (w * 16)))
}
