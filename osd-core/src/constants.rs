// =============================================================================
// Open SoC Debug protocol constants
// =============================================================================

// --- Packet header ---

/// Number of 16 bit header words in front of the payload (dest, src, flags)
pub const HEADER_WORDS: usize = 3;

/// Maximum number of words in a packet (the size field is 16 bit wide)
pub const MAX_DATA_WORDS: usize = u16::MAX as usize;

/// Packet length in words every module is guaranteed to accept
pub const MAX_PKG_LEN_WORDS: usize = 8;

/// Destination address: whole first header word
pub const DEST_SHIFT: u32 = 0;
pub const DEST_MASK: u16 = 0xFFFF;

/// Source address: whole second header word
pub const SRC_SHIFT: u32 = 0;
pub const SRC_MASK: u16 = 0xFFFF;

/// Packet type: bits 15:14 of the flags word
pub const TYPE_SHIFT: u32 = 14;
pub const TYPE_MASK: u16 = 0b11;

/// Packet sub-type: bits 13:10 of the flags word
pub const TYPE_SUB_SHIFT: u32 = 10;
pub const TYPE_SUB_MASK: u16 = 0b1111;

// --- Packet types ---

pub const TYPE_REG: u8 = 0;
pub const TYPE_RES1: u8 = 1;
pub const TYPE_EVENT: u8 = 2;
pub const TYPE_RES2: u8 = 3;

// --- REG sub-types ---

pub const REQ_READ_REG_16: u8 = 0b0000;
pub const REQ_READ_REG_32: u8 = 0b0001;
pub const REQ_READ_REG_64: u8 = 0b0010;
pub const REQ_READ_REG_128: u8 = 0b0011;
pub const RESP_READ_REG_SUCCESS_16: u8 = 0b1000;
pub const RESP_READ_REG_SUCCESS_32: u8 = 0b1001;
pub const RESP_READ_REG_SUCCESS_64: u8 = 0b1010;
pub const RESP_READ_REG_SUCCESS_128: u8 = 0b1011;
pub const RESP_READ_REG_ERROR: u8 = 0b1100;
pub const REQ_WRITE_REG_16: u8 = 0b0100;
pub const REQ_WRITE_REG_32: u8 = 0b0101;
pub const REQ_WRITE_REG_64: u8 = 0b0110;
pub const REQ_WRITE_REG_128: u8 = 0b0111;
pub const RESP_WRITE_REG_SUCCESS: u8 = 0b1110;
pub const RESP_WRITE_REG_ERROR: u8 = 0b1111;

/// Set on a read request sub-type to get the matching success response
pub const RESP_READ_SUCCESS_FLAG: u8 = 0b1000;
/// Set on a read request sub-type to get the matching write request
pub const REQ_WRITE_FLAG: u8 = 0b0100;

// --- EVENT sub-types ---

/// Last (or only) packet of an event
pub const EV_LAST: u8 = 0;
/// More packets of the same event follow
pub const EV_CONT: u8 = 1;
/// Event packets were dropped; payload word 0 is the number of lost events
pub const EV_OVERFLOW: u8 = 5;

// --- DI addresses ---

pub const DIADDR_SUBNET_BITS: u32 = 6;
pub const DIADDR_LOCAL_BITS: u32 = 16 - DIADDR_SUBNET_BITS;
pub const DIADDR_SUBNET_MAX: u16 = (1 << DIADDR_SUBNET_BITS) - 1;
pub const DIADDR_LOCAL_MAX: u16 = (1 << DIADDR_LOCAL_BITS) - 1;

/// The subnet control module always sits at local address 0
pub const DIADDR_LOCAL_SCM: u16 = 0;

// --- Trace decoding ---

/// STM event id used by software prints (value = one character)
pub const STM_PRINT_EVENT_ID: u16 = 4;

/// Maximum number of words in one MAM burst (HDR1.SELSIZE is 8 bit)
pub const MAM_MAX_BURST_WORDS: usize = 255;

/// Maximum number of memory regions a MAM reports
pub const MAM_MAX_REGIONS: usize = 8;
