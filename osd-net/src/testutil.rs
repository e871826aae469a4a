//! Scripted bus peers for unit tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Mutex, PoisonError};
use std::thread;

use osd_core::constants::{
    REQ_READ_REG_16, REQ_WRITE_REG_16, RESP_READ_REG_ERROR, RESP_READ_REG_SUCCESS_16,
    RESP_WRITE_REG_SUCCESS,
};
use osd_core::{Packet, PacketType};

use crate::bus::{self, memory, BusLink, Connector, Message};
use crate::hostmod::{EventHandler, HostModule};

/// Address handed out to the host module under test.
pub const OWN: u16 = 0x10;

/// Hands out one prepared link.
pub struct ScriptedConnector {
    pub link: Mutex<Option<BusLink>>,
}

impl Connector for ScriptedConnector {
    fn connect(&self) -> io::Result<BusLink> {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "used"))
    }

    fn endpoint(&self) -> String {
        "scripted".into()
    }
}

/// The far side of the bus as seen by a test.
pub struct Peer {
    pub link: BusLink,
}

impl Peer {
    pub fn recv(&mut self) -> Message {
        bus::recv_message(self.link.reader.as_mut()).unwrap().unwrap()
    }

    pub fn recv_packet(&mut self) -> Packet {
        match self.recv() {
            Message::Data(p) => p,
            other => panic!("unexpected {:?}", other),
        }
    }

    pub fn send(&mut self, msg: Message) {
        bus::send_message(self.link.writer.as_mut(), &msg).unwrap();
    }

    pub fn send_packet(&mut self, pkg: Packet) {
        self.send(Message::Data(pkg));
    }

    pub fn accept(&mut self, addr: u16) {
        assert_eq!(self.recv(), Message::mgmt("DIADDR_REQUEST"));
        self.send(Message::Mgmt(addr.to_string()));
    }
}

pub fn setup(handler: Option<EventHandler>) -> (HostModule, Peer) {
    let (ours, theirs) = memory::pair();
    let hm = HostModule::new(ScriptedConnector { link: Mutex::new(Some(ours)) }, handler);
    (hm, Peer { link: theirs })
}

pub fn connected(handler: Option<EventHandler>) -> (HostModule, Peer) {
    let (mut hm, mut peer) = setup(handler);
    let t = thread::spawn(move || {
        peer.accept(OWN);
        peer
    });
    hm.connect().unwrap();
    (hm, t.join().unwrap())
}

fn respond(req: &Packet, type_sub: u8, payload: &[u16]) -> Packet {
    Packet::with_payload(req.src(), req.dest(), PacketType::Reg, type_sub, payload)
}

/// Answers 16 bit register reads from `regs`, errors for unknown ones.
/// Returns the write requests it acknowledged.
pub fn serve_registers(peer: Peer, regs: HashMap<(u16, u16), u16>) -> thread::JoinHandle<Vec<Packet>> {
    serve(peer, move |req| regs.get(&(req.dest(), req.payload()[0])).copied())
}

/// Answers 16 bit register reads in the given order, whatever register
/// they address.
pub fn serve_reads(peer: Peer, values: Vec<u16>) -> thread::JoinHandle<Vec<Packet>> {
    let mut values = VecDeque::from(values);
    serve(peer, move |_| values.pop_front())
}

fn serve(
    mut peer: Peer,
    mut read: impl FnMut(&Packet) -> Option<u16> + Send + 'static,
) -> thread::JoinHandle<Vec<Packet>> {
    thread::spawn(move || {
        let mut writes = Vec::new();
        while let Ok(Some(msg)) = bus::recv_message(peer.link.reader.as_mut()) {
            let req = match msg {
                Message::Data(p) if p.packet_type() == PacketType::Reg => p,
                _ => continue,
            };
            let resp = match req.type_sub() {
                REQ_READ_REG_16 => match read(&req) {
                    Some(v) => respond(&req, RESP_READ_REG_SUCCESS_16, &[v]),
                    None => respond(&req, RESP_READ_REG_ERROR, &[]),
                },
                REQ_WRITE_REG_16 => {
                    writes.push(req.clone());
                    respond(&req, RESP_WRITE_REG_SUCCESS, &[])
                }
                other => panic!("unexpected request {:#x}", other),
            };
            peer.send_packet(resp);
        }
        writes
    })
}
