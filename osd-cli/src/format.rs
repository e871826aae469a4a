//! Output formatting for the OSD tools.

use osd_core::decoder::ctm::CtmEvent;
use osd_core::decoder::stm::StmEvent;
use osd_core::diaddr::DiAddr;
use osd_core::ModuleDescriptor;
use osd_net::TransferStatsSnapshot;

/// Format a byte count as a human-readable string.
pub fn size_str(num: u64) -> String {
    if num < 1000 {
        return format!("{} B", num);
    }
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut val = num as f64;
    let mut unit_idx = 0;
    while val >= 1000.0 && unit_idx < units.len() - 1 {
        val /= 1000.0;
        unit_idx += 1;
    }
    format!("{:.2} {}", val, units[unit_idx])
}

/// One line of the system trace event log: `timestamp id value`.
pub fn stm_event_line(ev: &StmEvent) -> String {
    if ev.overflow != 0 {
        return format!("OVERFLOW {}", ev.overflow);
    }
    format!("{:08x} {:04x} {:016x}", ev.timestamp, ev.id, ev.value)
}

/// One line of the core trace log:
/// `timestamp modechange call ret mode pc npc`.
pub fn ctm_event_line(ev: &CtmEvent) -> String {
    if ev.overflow != 0 {
        return format!("OVERFLOW {}", ev.overflow);
    }
    format!(
        "{:08x} {} {} {} {} {:016x} {:016x}",
        ev.timestamp,
        u8::from(ev.is_modechange),
        u8::from(ev.is_call),
        u8::from(ev.is_ret),
        ev.mode,
        ev.pc,
        ev.npc
    )
}

/// Module listing, one row per module.
pub fn module_table(modules: &[ModuleDescriptor]) -> String {
    let mut out = format!(
        "{:<8} {:<10} {:<10} {:<8}\n",
        "ADDR", "VENDOR", "TYPE", "VERSION"
    );
    for m in modules {
        out.push_str(&format!(
            "{:<8} {:<10} {:<10} {:<8}\n",
            DiAddr(m.addr).to_string(),
            m.vendor().name(),
            m.module_type().short_name(),
            m.version
        ));
    }
    out
}

/// Gateway transfer statistics for humans.
pub fn stats_str(stats: &TransferStatsSnapshot) -> String {
    format!(
        "connected since {} (UNIX time), {} from device, {} to device",
        stats.connect_time,
        size_str(stats.bytes_from_device),
        size_str(stats.bytes_to_device)
    )
}

/// Classic 16 bytes per row hex dump, addresses starting at `base`.
pub fn hexdump(base: u64, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, row) in data.chunks(16).enumerate() {
        let bytes: Vec<String> = row.iter().map(|b| format!("{:02x}", b)).collect();
        let text: String = row
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { char::from(b) } else { '.' })
            .collect();
        out.push_str(&format!(
            "{:08x}  {:<47}  |{}|\n",
            base + (i * 16) as u64,
            bytes.join(" "),
            text
        ));
    }
    out
}
