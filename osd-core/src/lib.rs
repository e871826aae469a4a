//! osd-core: the Open SoC Debug wire protocol.
//!
//! Packet format, register map, DI addresses, module identities and the
//! decoders for module specific event packets. No I/O and no threads; see
//! `osd-net` for the host controller, host modules and gateways.

#![cfg_attr(not(feature = "std"), no_std)]
extern crate alloc;

pub mod constants;
pub mod packet;
pub mod diaddr;
pub mod reg;
pub mod module;
pub mod decoder;
pub mod mam;

pub use decoder::ProtocolViolation;
pub use module::{ModuleDescriptor, ModuleType, Vendor};
pub use packet::{Packet, PacketError, PacketType};
