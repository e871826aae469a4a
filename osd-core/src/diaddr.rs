//! Debug interconnect (DI) addresses.
//!
//! A DI address is 16 bit wide: the upper 6 bits select the subnet, the
//! lower 10 bits the module inside that subnet.

use core::fmt;

use crate::constants::{
    DIADDR_LOCAL_BITS, DIADDR_LOCAL_MAX, DIADDR_LOCAL_SCM, DIADDR_SUBNET_MAX,
};

pub fn build(subnet: u16, local: u16) -> u16 {
    assert!(subnet <= DIADDR_SUBNET_MAX, "subnet {} out of range", subnet);
    assert!(local <= DIADDR_LOCAL_MAX, "local address {} out of range", local);
    (subnet << DIADDR_LOCAL_BITS) | local
}

pub fn subnet(diaddr: u16) -> u16 {
    diaddr >> DIADDR_LOCAL_BITS
}

pub fn local(diaddr: u16) -> u16 {
    diaddr & DIADDR_LOCAL_MAX
}

/// Address of the subnet control module of `subnet`.
pub fn scm(subnet: u16) -> u16 {
    build(subnet, DIADDR_LOCAL_SCM)
}

/// Displays a DI address as `subnet.local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiAddr(pub u16);

impl fmt::Display for DiAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", subnet(self.0), local(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn build_and_split() {
        let addr = build(1, 5);
        assert_eq!(addr, 0x0405);
        assert_eq!(subnet(addr), 1);
        assert_eq!(local(addr), 5);
    }

    #[test]
    fn scm_is_local_zero() {
        assert_eq!(scm(0), 0);
        assert_eq!(scm(2), 0x0800);
    }

    #[test]
    fn extremes() {
        let addr = build(63, 1023);
        assert_eq!(addr, 0xffff);
        assert_eq!(subnet(addr), 63);
        assert_eq!(local(addr), 1023);
    }

    #[test]
    #[should_panic]
    fn local_out_of_range() {
        build(0, 1024);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", DiAddr(build(1, 3))), "1.3");
    }
}
