//! Device Emulation Module UART client: a character terminal to the target.

use osd_core::decoder::dem_uart::{self, DemUartDesc};
use osd_core::{ModuleType, Packet};

use super::expect_module;
use crate::error::Result;
use crate::hostmod::{EventHandler, HostModule};

pub fn get_desc(hm: &HostModule, diaddr: u16) -> Result<DemUartDesc> {
    expect_module(hm, diaddr, ModuleType::DemUart)?;
    Ok(DemUartDesc { diaddr })
}

/// Send `s` to the UART, one event packet per byte.
pub fn send_string(hm: &HostModule, desc: &DemUartDesc, s: &[u8]) -> Result<()> {
    for &c in s {
        hm.event_send(dem_uart::encode(desc, hm.diaddr(), c))?;
    }
    Ok(())
}

/// Host module event handler passing received characters to `on_char`.
pub fn event_handler<F>(desc: DemUartDesc, mut on_char: F) -> EventHandler
where
    F: FnMut(u8) + Send + 'static,
{
    Box::new(move |pkg: Packet| {
        if pkg.src() != desc.diaddr {
            log::debug!("ignoring event from {:#06x}", pkg.src());
            return;
        }
        match dem_uart::decode(pkg) {
            Ok(c) => on_char(c),
            Err(e) => log::warn!("dropping UART event: {}", e),
        }
    })
}
