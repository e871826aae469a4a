//! System Trace Module client.

use osd_core::decoder::stm::{self, StmDesc, StmEvent};
use osd_core::{reg, ModuleType, Packet, ProtocolViolation};

use super::{expect_module, read_width};
use crate::error::Result;
use crate::hostmod::{EventHandler, HostModule};

/// Read the descriptor of the STM at `diaddr`.
pub fn get_desc(hm: &HostModule, diaddr: u16) -> Result<StmDesc> {
    expect_module(hm, diaddr, ModuleType::Stm)?;
    let valwidth = read_width(hm, diaddr, reg::STM_VALWIDTH, "VALWIDTH")?;
    Ok(StmDesc { diaddr, valwidth })
}

/// Host module event handler decoding the packets of one STM.
///
/// Packets from other sources are ignored. Undecodable packets are passed
/// on as errors so the caller decides whether to give up.
pub fn event_handler<F>(desc: StmDesc, mut on_event: F) -> EventHandler
where
    F: FnMut(std::result::Result<StmEvent, ProtocolViolation>) + Send + 'static,
{
    Box::new(move |pkg: Packet| {
        if pkg.src() != desc.diaddr {
            log::debug!("ignoring event from {:#06x}", pkg.src());
            return;
        }
        on_event(stm::decode(&desc, pkg));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OsdError;
    use crate::bus::Message;
    use crate::testutil::{connected, serve_registers};
    use osd_core::constants::{EV_LAST, EV_OVERFLOW, RESP_READ_REG_SUCCESS_16};
    use osd_core::PacketType;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::thread;

    const STM: u16 = 0x0405;

    fn stm_registers(valwidth: u16) -> HashMap<(u16, u16), u16> {
        HashMap::from([
            ((STM, reg::MOD_VENDOR), 1),
            ((STM, reg::MOD_TYPE), ModuleType::Stm.id()),
            ((STM, reg::MOD_VERSION), 0),
            ((STM, reg::STM_VALWIDTH), valwidth),
        ])
    }

    #[test]
    fn desc_of_stm() {
        let (hm, peer) = connected(None);
        let server = serve_registers(peer, stm_registers(32));
        assert_eq!(
            get_desc(&hm, STM).unwrap(),
            StmDesc { diaddr: STM, valwidth: 32 }
        );
        drop(hm);
        server.join().unwrap();
    }

    #[test]
    fn invalid_valwidth_is_protocol_violation() {
        let (hm, peer) = connected(None);
        let server = serve_registers(peer, stm_registers(24));
        let err = get_desc(&hm, STM).unwrap_err();
        assert!(matches!(err, OsdError::Protocol(ProtocolViolation::InvalidWidth { value: 24, .. })));
        assert!(err.is_fatal());
        drop(hm);
        server.join().unwrap();
    }

    #[test]
    fn foreign_vendor_stops_after_identification() {
        let (hm, mut peer) = connected(None);
        let t = thread::spawn(move || {
            for value in [2, ModuleType::Stm.id(), 0] {
                let req = peer.recv_packet();
                peer.send_packet(Packet::with_payload(
                    req.src(),
                    req.dest(),
                    PacketType::Reg,
                    RESP_READ_REG_SUCCESS_16,
                    &[value],
                ));
            }
            peer.recv()
        });
        assert!(matches!(get_desc(&hm, STM), Err(OsdError::WrongModule(STM))));
        drop(hm);
        // no VALWIDTH read, the next message is the address release
        assert_eq!(t.join().unwrap(), Message::mgmt("DIADDR_RELEASE"));
    }

    #[test]
    fn handler_decodes_own_events() {
        let desc = StmDesc { diaddr: STM, valwidth: 16 };
        let (tx, rx) = mpsc::channel();
        let mut handler = event_handler(desc, move |ev| tx.send(ev).unwrap());

        handler(Packet::with_payload(0x10, 0x0406, PacketType::Event, EV_LAST, &[0, 0, 4, 0x41]));
        handler(Packet::with_payload(0x10, STM, PacketType::Event, EV_LAST, &[0x5678, 0x1234, 4, 0x41]));
        handler(Packet::with_payload(0x10, STM, PacketType::Event, EV_OVERFLOW, &[3]));

        let ev = rx.recv().unwrap().unwrap();
        assert_eq!(ev.timestamp, 0x1234_5678);
        assert!(ev.is_print_event());
        assert_eq!(ev.value, 0x41);
        assert_eq!(rx.recv().unwrap().unwrap().overflow, 3);
        assert!(rx.try_recv().is_err());
    }
}
