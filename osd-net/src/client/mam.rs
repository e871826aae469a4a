//! Memory Access Module client: read and write target memory.
//!
//! Transfers are streamed to the MAM as event packets; read data and write
//! acknowledgements come back the same way. The host module must run
//! without an event handler, so these packets end up in the queue read by
//! [`HostModule::event_receive`].

use osd_core::constants::MAM_MAX_REGIONS;
use osd_core::diaddr::DiAddr;
use osd_core::mam::{
    bursts, byte_select, calculate_parts, create_transfer, region_value, transfer_packets,
    unpack_words, MemDesc, MemRegion,
};
use osd_core::{reg, ModuleType, Packet};

use super::{expect_module, read_width};
use crate::error::{OsdError, Result};
use crate::hostmod::{Flags, HostModule};

/// Read the descriptor of the MAM at `diaddr`.
pub fn get_desc(hm: &HostModule, diaddr: u16) -> Result<MemDesc> {
    expect_module(hm, diaddr, ModuleType::Mam)?;
    let addr_width_bit = read_width(hm, diaddr, reg::MAM_AW, "AW")?;
    let data_width_bit = read_width(hm, diaddr, reg::MAM_DW, "DW")?;

    let num_regions = hm.reg_read(diaddr, reg::MAM_REGIONS, 16, Flags::NONE)? as usize;
    if num_regions > MAM_MAX_REGIONS {
        return Err(OsdError::DeviceInvalidData(format!(
            "MAM at {} reports {} regions",
            DiAddr(diaddr),
            num_regions
        )));
    }

    let mut regions = Vec::with_capacity(num_regions);
    for region in 0..num_regions as u16 {
        let baseaddr = read_region_value(hm, diaddr, |w| reg::mam_region_baseaddr(region, w))?;
        let memsize = read_region_value(hm, diaddr, |w| reg::mam_region_memsize(region, w))?;
        regions.push(MemRegion { baseaddr, memsize });
    }

    Ok(MemDesc {
        diaddr,
        addr_width_bit,
        data_width_bit,
        regions,
    })
}

fn read_region_value(hm: &HostModule, diaddr: u16, reg_of_word: impl Fn(u16) -> u16) -> Result<u64> {
    let mut words = [0u16; 4];
    for (w, word) in words.iter_mut().enumerate() {
        *word = hm.reg_read(diaddr, reg_of_word(w as u16), 16, Flags::NONE)? as u16;
    }
    Ok(region_value(words))
}

/// Descriptors of all standard MAMs in `subnet`.
///
/// Modules that can not be described are logged and left out.
pub fn find_memories(hm: &HostModule, subnet: u16) -> Result<Vec<MemDesc>> {
    let modules = match hm.get_modules(subnet) {
        Ok(m) | Err(OsdError::PartialResult(m)) => m,
        Err(e) => return Err(e),
    };

    let mut memories = Vec::new();
    for module in modules.iter().filter(|m| m.is(ModuleType::Mam, 0)) {
        match get_desc(hm, module.addr) {
            Ok(desc) => memories.push(desc),
            Err(e) => log::error!(
                "unable to get information from MAM at {}: {}",
                DiAddr(module.addr),
                e
            ),
        }
    }
    Ok(memories)
}

// =============================================================================
// Transfers
// =============================================================================

fn send_transfer(hm: &HostModule, desc: &MemDesc, transfer: &[u8]) -> Result<()> {
    let max_words = hm.get_max_event_words(desc.diaddr);
    for pkg in transfer_packets(desc, hm.diaddr(), transfer, max_words) {
        hm.event_send(pkg)?;
    }
    Ok(())
}

/// Next event sent by the MAM itself.
fn receive_from(hm: &HostModule, desc: &MemDesc) -> Result<Packet> {
    loop {
        let pkg = hm.event_receive(Flags::BLOCKING)?;
        if pkg.src() == desc.diaddr {
            return Ok(pkg);
        }
        log::warn!(
            "dropping event from {} while waiting for MAM {}",
            DiAddr(pkg.src()),
            DiAddr(desc.diaddr)
        );
    }
}

/// `(address, length)` pieces of an unaligned range, none crossing a word.
fn word_pieces(start_addr: u64, nbyte: usize, dw: usize) -> Vec<(u64, usize)> {
    let mut pieces = Vec::new();
    let mut addr = start_addr;
    let mut left = nbyte;
    while left > 0 {
        let baddr = (addr % dw as u64) as usize;
        let n = left.min(dw - baddr);
        pieces.push((addr, n));
        addr += n as u64;
        left -= n;
    }
    pieces
}

fn write_transfer(
    hm: &HostModule,
    desc: &MemDesc,
    addr: u64,
    data: &[u8],
    burst: bool,
    sync: bool,
    selsize: u8,
) -> Result<()> {
    let transfer = create_transfer(desc, true, burst, sync, selsize, addr, data);
    send_transfer(hm, desc, &transfer)?;
    if sync {
        receive_from(hm, desc)?;
    }
    Ok(())
}

/// Unaligned bytes, one masked word access per piece.
fn write_single(hm: &HostModule, desc: &MemDesc, start_addr: u64, data: &[u8], sync: bool) -> Result<()> {
    let dw = desc.data_bytes();
    let pieces = word_pieces(start_addr, data.len(), dw);
    let last = pieces.len() - 1;
    let mut pos = 0;
    for (i, (addr, n)) in pieces.into_iter().enumerate() {
        let baddr = (addr % dw as u64) as usize;
        let mut word = vec![0u8; dw];
        word[baddr..baddr + n].copy_from_slice(&data[pos..pos + n]);
        let mask = byte_select(baddr, n, dw);
        write_transfer(hm, desc, addr - baddr as u64, &word, false, sync && i == last, mask)?;
        pos += n;
    }
    Ok(())
}

/// Word aligned bytes in bursts. Only the last burst is synchronous.
fn write_burst(hm: &HostModule, desc: &MemDesc, start_addr: u64, data: &[u8], sync: bool) -> Result<()> {
    let dw = desc.data_bytes();
    let chunks = bursts(data.len(), dw);
    let last = chunks.len() - 1;
    for (i, (off, len)) in chunks.into_iter().enumerate() {
        write_transfer(
            hm,
            desc,
            start_addr + off as u64,
            &data[off..off + len],
            true,
            sync && i == last,
            (len / dw) as u8,
        )?;
    }
    Ok(())
}

/// Write `data` to target memory at `start_addr`.
///
/// Returns after the MAM acknowledged the last part of the write.
pub fn write(hm: &HostModule, desc: &MemDesc, start_addr: u64, data: &[u8]) -> Result<()> {
    let parts = calculate_parts(start_addr, data.len(), desc.data_bytes());
    let (head, rest) = data.split_at(parts.prolog);
    let (body, tail) = rest.split_at(parts.bulk);
    log::debug!(
        "MAM {}: writing {} bytes at {:#x} ({}/{}/{})",
        DiAddr(desc.diaddr),
        data.len(),
        start_addr,
        head.len(),
        body.len(),
        tail.len()
    );

    let mut addr = start_addr;
    if !head.is_empty() {
        write_single(hm, desc, addr, head, body.is_empty() && tail.is_empty())?;
        addr += head.len() as u64;
    }
    if !body.is_empty() {
        write_burst(hm, desc, addr, body, tail.is_empty())?;
        addr += body.len() as u64;
    }
    if !tail.is_empty() {
        write_single(hm, desc, addr, tail, true)?;
    }
    Ok(())
}

fn read_transfer(
    hm: &HostModule,
    desc: &MemDesc,
    addr: u64,
    nbyte: usize,
    burst: bool,
    selsize: u8,
) -> Result<Vec<u8>> {
    let transfer = create_transfer(desc, false, burst, false, selsize, addr, &[]);
    send_transfer(hm, desc, &transfer)?;

    let mut data = Vec::with_capacity(nbyte);
    while data.len() < nbyte {
        let pkg = receive_from(hm, desc)?;
        unpack_words(pkg.payload(), &mut data);
    }
    data.truncate(nbyte);
    Ok(data)
}

/// Read `nbyte` bytes of target memory at `start_addr`.
pub fn read(hm: &HostModule, desc: &MemDesc, start_addr: u64, nbyte: usize) -> Result<Vec<u8>> {
    let dw = desc.data_bytes();
    let parts = calculate_parts(start_addr, nbyte, dw);
    let mut out = Vec::with_capacity(nbyte);

    let single = |out: &mut Vec<u8>, start: u64, len: usize| -> Result<()> {
        for (addr, n) in word_pieces(start, len, dw) {
            let baddr = (addr % dw as u64) as usize;
            let mask = byte_select(baddr, n, dw);
            let word = read_transfer(hm, desc, addr - baddr as u64, dw, false, mask)?;
            out.extend_from_slice(&word[baddr..baddr + n]);
        }
        Ok(())
    };

    let mut addr = start_addr;
    if parts.prolog > 0 {
        single(&mut out, addr, parts.prolog)?;
        addr += parts.prolog as u64;
    }
    for (off, len) in bursts(parts.bulk, dw) {
        let chunk = read_transfer(hm, desc, addr + off as u64, len, true, (len / dw) as u8)?;
        out.extend_from_slice(&chunk);
    }
    addr += parts.bulk as u64;
    if parts.epilog > 0 {
        single(&mut out, addr, parts.epilog)?;
    }
    Ok(out)
}

/// Write `data` and read it back.
pub fn write_verified(hm: &HostModule, desc: &MemDesc, start_addr: u64, data: &[u8]) -> Result<()> {
    write(hm, desc, start_addr, data)?;
    let readback = read(hm, desc, start_addr, data.len())?;
    if readback != data {
        log::error!(
            "MAM {}: verification of {} bytes at {:#x} failed",
            DiAddr(desc.diaddr),
            data.len(),
            start_addr
        );
        return Err(OsdError::MemVerifyFailed);
    }
    Ok(())
}
