//! Shared pieces of the OSD command line tools.

pub mod args;
pub mod format;
pub mod signal;
