//! Clients for the standard OSD debug modules.
//!
//! Each client reads the static description of one module through a
//! [`HostModule`] and turns its event packets into typed records.
//! Descriptors are only handed out for modules whose identity matches;
//! anything else is [`OsdError::WrongModule`].

pub mod ctm;
pub mod dem_uart;
pub mod mam;
pub mod scm;
pub mod stm;

use osd_core::decoder::check_width;
use osd_core::{ModuleDescriptor, ModuleType};

use crate::error::{OsdError, Result};
use crate::hostmod::{Flags, HostModule};

/// Describe the module at `diaddr` and check it is an OSD module of type
/// `ty`, version 0.
///
/// Transport errors while describing are passed on unchanged.
pub fn expect_module(hm: &HostModule, diaddr: u16, ty: ModuleType) -> Result<ModuleDescriptor> {
    let desc = hm.describe_module(diaddr)?;
    if !desc.is(ty, 0) {
        log::debug!("expected {}, found {}", ty.short_name(), desc);
        return Err(OsdError::WrongModule(diaddr));
    }
    Ok(desc)
}

/// Read a 16 bit register that holds a field width in bits.
fn read_width(hm: &HostModule, diaddr: u16, reg_addr: u16, name: &'static str) -> Result<u16> {
    let value = hm.reg_read(diaddr, reg_addr, 16, Flags::NONE)? as u16;
    Ok(check_width(name, value)?)
}
