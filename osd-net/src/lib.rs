//! osd-net: the host side of Open SoC Debug on std threads and sockets.
//!
//! - [`hostctrl`]: the host controller, a broker that assigns DI addresses
//!   and routes packets between host modules and gateways.
//! - [`hostmod`]: host module client with synchronous register access and
//!   event delivery.
//! - [`gateway`]: bridges one device subnet into the host controller.
//! - [`client`]: typed clients for the standard debug modules.

pub mod bus;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod gateway;
pub mod hostctrl;
pub mod hostmod;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{OsdError, Result};
pub use gateway::{Gateway, TransferStatsSnapshot};
pub use hostctrl::{HostController, HostControllerConfig};
pub use hostmod::{EventHandler, Flags, HostModule};
