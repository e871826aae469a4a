//! Module identities: vendor and type ids with their names.

use core::fmt;

use crate::diaddr::DiAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Vendor {
    Unknown,
    Osd,
    OptimSoc,
    LowRisc,
    /// An id without a known name
    Other(u16),
}

impl Vendor {
    pub fn from_id(id: u16) -> Self {
        match id {
            0 => Vendor::Unknown,
            1 => Vendor::Osd,
            2 => Vendor::OptimSoc,
            3 => Vendor::LowRisc,
            other => Vendor::Other(other),
        }
    }

    pub fn id(self) -> u16 {
        match self {
            Vendor::Unknown => 0,
            Vendor::Osd => 1,
            Vendor::OptimSoc => 2,
            Vendor::LowRisc => 3,
            Vendor::Other(id) => id,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Vendor::Unknown | Vendor::Other(_) => "UNKNOWN",
            Vendor::Osd => "The Open SoC Debug Project",
            Vendor::OptimSoc => "The OpTiMSoC Project",
            Vendor::LowRisc => "LowRISC",
        }
    }
}

/// Standard module types defined for the OSD vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ModuleType {
    Unknown,
    Scm,
    DemUart,
    Mam,
    Stm,
    Ctm,
    Other(u16),
}

impl ModuleType {
    pub fn from_id(id: u16) -> Self {
        match id {
            0 => ModuleType::Unknown,
            1 => ModuleType::Scm,
            2 => ModuleType::DemUart,
            3 => ModuleType::Mam,
            4 => ModuleType::Stm,
            5 => ModuleType::Ctm,
            other => ModuleType::Other(other),
        }
    }

    pub fn id(self) -> u16 {
        match self {
            ModuleType::Unknown => 0,
            ModuleType::Scm => 1,
            ModuleType::DemUart => 2,
            ModuleType::Mam => 3,
            ModuleType::Stm => 4,
            ModuleType::Ctm => 5,
            ModuleType::Other(id) => id,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            ModuleType::Unknown | ModuleType::Other(_) => "UNKNOWN",
            ModuleType::Scm => "SCM",
            ModuleType::DemUart => "DEM_UART",
            ModuleType::Mam => "MAM",
            ModuleType::Stm => "STM",
            ModuleType::Ctm => "CTM",
        }
    }

    pub fn long_name(self) -> &'static str {
        match self {
            ModuleType::Unknown | ModuleType::Other(_) => "UNKNOWN",
            ModuleType::Scm => "Subnet Control Module",
            ModuleType::DemUart => "Device Emulation Module UART",
            ModuleType::Mam => "Memory Access Module",
            ModuleType::Stm => "System Trace Module",
            ModuleType::Ctm => "Core Trace Module",
        }
    }
}

/// Identity of one module, as read from its base registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ModuleDescriptor {
    pub addr: u16,
    pub vendor: u16,
    pub module_type: u16,
    pub version: u16,
}

impl ModuleDescriptor {
    /// Placeholder for a module that could not be described.
    pub fn unknown(addr: u16) -> Self {
        ModuleDescriptor {
            addr,
            vendor: Vendor::Unknown.id(),
            module_type: ModuleType::Unknown.id(),
            version: 0,
        }
    }

    pub fn vendor(&self) -> Vendor {
        Vendor::from_id(self.vendor)
    }

    /// Type names are only defined for modules of the OSD vendor.
    pub fn module_type(&self) -> ModuleType {
        if self.vendor() == Vendor::Osd {
            ModuleType::from_id(self.module_type)
        } else {
            ModuleType::Unknown
        }
    }

    /// `true` for a standard OSD module of type `ty` in version `version`.
    pub fn is(&self, ty: ModuleType, version: u16) -> bool {
        self.vendor() == Vendor::Osd && self.module_type == ty.id() && self.version == version
    }
}

impl fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: vendor {} ({}), type {} ({}), version {}",
            DiAddr(self.addr),
            self.vendor,
            self.vendor().name(),
            self.module_type,
            self.module_type().short_name(),
            self.version
        )
    }
}
