//! Core Trace Module client.

use osd_core::decoder::ctm::{self, CtmDesc, CtmEvent};
use osd_core::{reg, ModuleType, Packet, ProtocolViolation};

use super::{expect_module, read_width};
use crate::error::Result;
use crate::hostmod::{EventHandler, HostModule};

/// Read the descriptor of the CTM at `diaddr`.
///
/// Address and data width share one register offset.
pub fn get_desc(hm: &HostModule, diaddr: u16) -> Result<CtmDesc> {
    expect_module(hm, diaddr, ModuleType::Ctm)?;
    let addr_width = read_width(hm, diaddr, reg::CTM_ADDR_WIDTH, "ADDR_WIDTH")?;
    let data_width = read_width(hm, diaddr, reg::CTM_DATA_WIDTH, "DATA_WIDTH")?;
    Ok(CtmDesc {
        diaddr,
        addr_width,
        data_width,
    })
}

/// Host module event handler decoding the packets of one CTM.
pub fn event_handler<F>(desc: CtmDesc, mut on_event: F) -> EventHandler
where
    F: FnMut(std::result::Result<CtmEvent, ProtocolViolation>) + Send + 'static,
{
    Box::new(move |pkg: Packet| {
        if pkg.src() != desc.diaddr {
            log::debug!("ignoring event from {:#06x}", pkg.src());
            return;
        }
        on_event(ctm::decode(&desc, pkg));
    })
}
