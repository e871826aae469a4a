// =============================================================================
// Register map
// =============================================================================
//
// Addresses are relative to the module; every module implements the base
// registers, module type specific registers start at 0x200.

// --- Base registers (all modules) ---

pub const MOD_VENDOR: u16 = 0x0000;
pub const MOD_TYPE: u16 = 0x0001;
pub const MOD_VERSION: u16 = 0x0002;
pub const MOD_CS: u16 = 0x0003;
pub const MOD_EVENT_DEST: u16 = 0x0004;

/// MOD_CS: module is active and emits events
pub const MOD_CS_ACTIVE_BIT: u32 = 0;

// --- SCM: subnet control module ---

pub const SCM_SYSTEM_VENDOR_ID: u16 = 0x0200;
pub const SCM_SYSTEM_DEVICE_ID: u16 = 0x0201;
pub const SCM_NUM_MOD: u16 = 0x0202;
pub const SCM_MAX_PKT_LEN: u16 = 0x0203;
pub const SCM_SYSRST: u16 = 0x0204;

/// SYSRST: hold the whole system in reset
pub const SCM_SYSRST_SYS_RST_BIT: u32 = 0;
/// SYSRST: hold the CPUs in reset
pub const SCM_SYSRST_CPU_RST_BIT: u32 = 1;

// --- MAM: memory access module ---

pub const MAM_AW: u16 = 0x0200;
pub const MAM_DW: u16 = 0x0201;
pub const MAM_REGIONS: u16 = 0x0202;

/// Word `word` (0..4, least significant first) of the base address of `region`.
pub const fn mam_region_baseaddr(region: u16, word: u16) -> u16 {
    0x0280 + 0x10 * region + word
}

/// Word `word` (0..4, least significant first) of the size of `region`.
pub const fn mam_region_memsize(region: u16, word: u16) -> u16 {
    0x0284 + 0x10 * region + word
}

// --- STM: system trace module ---

pub const STM_VALWIDTH: u16 = 0x0200;

// --- CTM: core trace module ---

pub const CTM_ADDR_WIDTH: u16 = 0x0200;
pub const CTM_DATA_WIDTH: u16 = 0x0200;
