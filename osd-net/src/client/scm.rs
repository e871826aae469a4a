//! Subnet Control Module client: system identity and reset control.

use osd_core::diaddr;
use osd_core::reg;
use serde::Serialize;

use crate::error::Result;
use crate::hostmod::{Flags, HostModule};

/// Identity of a subnet as reported by its SCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubnetInfo {
    pub vendor_id: u16,
    pub device_id: u16,
    /// Largest packet (in words) every module of the subnet accepts.
    pub max_pkt_len: u16,
}

pub fn get_subnetinfo(hm: &HostModule, subnet: u16) -> Result<SubnetInfo> {
    let scm = diaddr::scm(subnet);
    let read = |reg_addr: u16, name: &str| -> Result<u16> {
        hm.reg_read(scm, reg_addr, 16, Flags::NONE)
            .map(|v| v as u16)
            .map_err(|e| {
                log::error!("unable to read {} from SCM of subnet {}: {}", name, subnet, e);
                e
            })
    };
    let info = SubnetInfo {
        vendor_id: read(reg::SCM_SYSTEM_VENDOR_ID, "VENDOR_ID")?,
        device_id: read(reg::SCM_SYSTEM_DEVICE_ID, "DEVICE_ID")?,
        max_pkt_len: read(reg::SCM_MAX_PKT_LEN, "MAX_PKT_LEN")?,
    };
    log::debug!(
        "subnet {}: vendor {}, device {}, max packet length {}",
        subnet,
        info.vendor_id,
        info.device_id,
        info.max_pkt_len
    );
    Ok(info)
}

/// Release the CPUs of `subnet` from reset.
pub fn cpus_start(hm: &HostModule, subnet: u16) -> Result<()> {
    set_reset(hm, subnet, reg::SCM_SYSRST_CPU_RST_BIT, false)
}

/// Hold the CPUs of `subnet` in reset.
pub fn cpus_stop(hm: &HostModule, subnet: u16) -> Result<()> {
    set_reset(hm, subnet, reg::SCM_SYSRST_CPU_RST_BIT, true)
}

/// Pulse the system reset of `subnet`.
pub fn system_reset(hm: &HostModule, subnet: u16) -> Result<()> {
    set_reset(hm, subnet, reg::SCM_SYSRST_SYS_RST_BIT, true)?;
    set_reset(hm, subnet, reg::SCM_SYSRST_SYS_RST_BIT, false)
}

fn set_reset(hm: &HostModule, subnet: u16, bit: u32, value: bool) -> Result<()> {
    hm.reg_setbit(bit, value, diaddr::scm(subnet), reg::SCM_SYSRST, 16, Flags::BLOCKING)
}
