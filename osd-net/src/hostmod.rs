//! Host module: a debug module implemented in software on the host.
//!
//! A [`HostModule`] connects to the host controller, claims a DI address
//! and then talks to the modules on the debug interconnect: synchronous
//! register access, and a stream of event packets delivered to a handler.
//!
//! A dedicated receive thread reads the bus. REG packets are handed to the
//! register call currently waiting (there is at most one), EVENT packets are
//! reassembled and passed to the event handler, or queued for
//! [`HostModule::event_receive`] if no handler is set.
//!
//! Preconditions:
//! - Register calls are serialized by an internal lock; a second concurrent
//!   call blocks until the first one completed.
//! - The event handler runs on the receive thread. It must not issue
//!   register calls on the same host module: their responses would be
//!   read by the thread that is busy running the handler.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use osd_core::constants::{
    EV_CONT, EV_LAST, MAX_PKG_LEN_WORDS, REQ_READ_REG_128, REQ_READ_REG_16, REQ_READ_REG_32,
    REQ_READ_REG_64, REQ_WRITE_FLAG, RESP_READ_REG_ERROR, RESP_READ_SUCCESS_FLAG,
    RESP_WRITE_REG_ERROR, RESP_WRITE_REG_SUCCESS,
};
use osd_core::diaddr::{self, DiAddr};
use osd_core::packet::{data2payload, payload2data};
use osd_core::{reg, ModuleDescriptor, Packet, PacketType};

use crate::bus::{self, Closer, Connector, Message, Reader, Writer};
use crate::error::{OsdError, Result};

/// Register access timeout unless [`Flags::BLOCKING`] is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Handler for incoming event packets. Owns each packet it receives.
pub type EventHandler = Box<dyn FnMut(Packet) + Send>;

/// Options of a single register or event call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// Wait without timeout.
    pub blocking: bool,
}

impl Flags {
    pub const NONE: Flags = Flags { blocking: false };
    pub const BLOCKING: Flags = Flags { blocking: true };
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// State shared with the receive thread
// =============================================================================

struct State {
    connected: bool,
    /// Source address the waiting register call expects a response from.
    waiting_for: Option<u16>,
    response: Option<Packet>,
    /// Responses still owed by modules whose calls timed out, per source.
    stale: HashMap<u16, usize>,
    /// Events received while no handler is set.
    events: VecDeque<Packet>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    handler: Mutex<Option<EventHandler>>,
}

impl Shared {
    fn new(handler: Option<EventHandler>) -> Self {
        Shared {
            state: Mutex::new(State {
                connected: false,
                waiting_for: None,
                response: None,
                stale: HashMap::new(),
                events: VecDeque::new(),
            }),
            cond: Condvar::new(),
            handler: Mutex::new(handler),
        }
    }

    fn deliver_response(&self, pkg: Packet) {
        let mut st = lock(&self.state);
        if let Some(owed) = st.stale.get_mut(&pkg.src()) {
            *owed -= 1;
            if *owed == 0 {
                st.stale.remove(&pkg.src());
            }
            log::warn!(
                "dropping late register response from {}",
                DiAddr(pkg.src())
            );
            return;
        }
        match st.waiting_for {
            Some(src) if src == pkg.src() && st.response.is_none() => {
                st.response = Some(pkg);
                self.cond.notify_all();
            }
            _ => log::warn!(
                "dropping register response from {} with no call waiting for it",
                DiAddr(pkg.src())
            ),
        }
    }

    fn dispatch_event(&self, pkg: Packet) {
        let mut handler = lock(&self.handler);
        match handler.as_mut() {
            Some(h) => h(pkg),
            None => {
                drop(handler);
                lock(&self.state).events.push_back(pkg);
                self.cond.notify_all();
            }
        }
    }

    fn set_connected(&self, connected: bool) {
        let mut st = lock(&self.state);
        st.connected = connected;
        if !connected {
            st.waiting_for = None;
            st.response = None;
            st.stale.clear();
        }
        self.cond.notify_all();
    }

    /// Wait until `ready` yields a value, the link drops or the deadline
    /// passes.
    fn wait_for<T>(
        &self,
        timeout: Option<Duration>,
        mut ready: impl FnMut(&mut State) -> Option<T>,
    ) -> Result<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = lock(&self.state);
        loop {
            if let Some(v) = ready(&mut st) {
                return Ok(v);
            }
            if !st.connected {
                return Err(OsdError::NotConnected);
            }
            st = match deadline {
                None => self.cond.wait(st).unwrap_or_else(PoisonError::into_inner),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(OsdError::TimedOut);
                    }
                    self.cond
                        .wait_timeout(st, d - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

// =============================================================================
// HostModule
// =============================================================================

pub struct HostModule {
    connector: Box<dyn Connector>,
    shared: Arc<Shared>,
    writer: Mutex<Option<Box<dyn Writer>>>,
    closer: Option<Box<dyn Closer>>,
    receiver: Option<JoinHandle<()>>,
    call_lock: Mutex<()>,
    diaddr: u16,
    timeout: Duration,
}

impl HostModule {
    /// Create a disconnected host module.
    pub fn new(connector: impl Connector + 'static, event_handler: Option<EventHandler>) -> Self {
        HostModule {
            connector: Box::new(connector),
            shared: Arc::new(Shared::new(event_handler)),
            writer: Mutex::new(None),
            closer: None,
            receiver: None,
            call_lock: Mutex::new(()),
            diaddr: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace the event handler; `None` queues events for
    /// [`HostModule::event_receive`].
    pub fn set_event_handler(&self, handler: Option<EventHandler>) {
        *lock(&self.shared.handler) = handler;
    }

    /// Timeout of non-blocking calls; zero waits forever.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn host_controller_address(&self) -> String {
        self.connector.endpoint()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.state).connected
    }

    /// DI address assigned by the host controller; only valid while
    /// connected.
    pub fn diaddr(&self) -> u16 {
        self.diaddr
    }

    /// Connect to the host controller and claim a DI address.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(OsdError::Failure("already connected".into()));
        }
        // leftovers of a connection lost on the remote side
        if let Some(closer) = self.closer.take() {
            closer.close();
        }
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
        let endpoint = self.connector.endpoint();
        let mut link = self
            .connector
            .connect()
            .map_err(|e| OsdError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;

        let claimed = request_diaddr(link.writer.as_mut(), link.reader.as_mut());
        let diaddr = match claimed {
            Ok(a) => a,
            Err(e) => {
                link.closer.close();
                return Err(e);
            }
        };

        self.diaddr = diaddr;
        *lock(&self.writer) = Some(link.writer);
        self.shared.set_connected(true);

        let shared = self.shared.clone();
        let reader = link.reader;
        let handle = thread::Builder::new()
            .name(format!("hostmod-{}", DiAddr(diaddr)))
            .spawn(move || receive_loop(reader, shared));
        match handle {
            Ok(h) => self.receiver = Some(h),
            Err(e) => {
                self.shared.set_connected(false);
                link.closer.close();
                return Err(e.into());
            }
        }
        self.closer = Some(link.closer);

        log::info!("connected to {} as {}", endpoint, DiAddr(diaddr));
        Ok(())
    }

    /// Release the DI address and close the connection.
    ///
    /// Must not race with a register call on another thread; such a call
    /// returns [`OsdError::NotConnected`].
    pub fn disconnect(&mut self) -> Result<()> {
        if self.closer.is_none() {
            return Err(OsdError::NotConnected);
        }
        if let Some(w) = lock(&self.writer).as_mut() {
            if let Err(e) = bus::send_message(w.as_mut(), &Message::mgmt(bus::MGMT_DIADDR_RELEASE)) {
                log::debug!("unable to release {}: {}", DiAddr(self.diaddr), e);
            }
        }
        if let Some(closer) = self.closer.take() {
            closer.close();
        }
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
        *lock(&self.writer) = None;
        self.shared.set_connected(false);
        log::info!("disconnected {}", DiAddr(self.diaddr));
        Ok(())
    }

    fn send(&self, pkg: Packet) -> Result<()> {
        let mut writer = lock(&self.writer);
        let w = writer.as_mut().ok_or(OsdError::NotConnected)?;
        bus::send_message(w.as_mut(), &Message::Data(pkg))
            .map_err(|e| OsdError::Com(e.to_string()))
    }

    fn call_timeout(&self, flags: Flags) -> Option<Duration> {
        if flags.blocking || self.timeout.is_zero() {
            None
        } else {
            Some(self.timeout)
        }
    }

    /// Send a REG request and wait for its response.
    fn reg_access(&self, request: Packet, flags: Flags) -> Result<Packet> {
        let _call = lock(&self.call_lock);
        {
            let mut st = lock(&self.shared.state);
            if !st.connected {
                return Err(OsdError::NotConnected);
            }
            st.response = None;
            st.waiting_for = Some(request.dest());
        }
        let dest = request.dest();

        let sent = self.send(request);
        let result = sent.and_then(|()| {
            self.shared
                .wait_for(self.call_timeout(flags), |st| st.response.take())
        });

        let mut st = lock(&self.shared.state);
        st.waiting_for = None;
        if matches!(result, Err(OsdError::TimedOut)) {
            // the response may have slipped in after the deadline
            if st.response.take().is_none() {
                *st.stale.entry(dest).or_insert(0) += 1;
            }
        }
        result
    }

    /// Read a 16, 32, 64 or 128 bit register as little-endian words.
    pub fn reg_read_words(
        &self,
        diaddr: u16,
        reg_addr: u16,
        reg_size_bit: u16,
        flags: Flags,
    ) -> Result<Vec<u16>> {
        let req_sub = read_request_subtype(reg_size_bit);
        let words = usize::from(reg_size_bit / 16);
        let request = Packet::with_payload(diaddr, self.diaddr, PacketType::Reg, req_sub, &[reg_addr]);

        let resp = self.reg_access(request, flags)?;
        let sub = resp.type_sub();
        if sub == RESP_READ_REG_ERROR {
            log::debug!(
                "device error reading register {:#06x} of {}",
                reg_addr,
                DiAddr(diaddr)
            );
            return Err(OsdError::DeviceError);
        }
        if sub != req_sub | RESP_READ_SUCCESS_FLAG {
            return Err(OsdError::DeviceInvalidData(format!(
                "unexpected response subtype {:#x} to register read",
                sub
            )));
        }
        if resp.data_size_words() != payload2data(words) {
            return Err(OsdError::DeviceInvalidData(format!(
                "read response has {} words, expected {}",
                resp.data_size_words(),
                payload2data(words)
            )));
        }
        Ok(resp.payload().to_vec())
    }

    /// Read a register of up to 64 bit.
    pub fn reg_read(&self, diaddr: u16, reg_addr: u16, reg_size_bit: u16, flags: Flags) -> Result<u64> {
        assert!(reg_size_bit <= 64, "use reg_read_words for wider registers");
        let words = self.reg_read_words(diaddr, reg_addr, reg_size_bit, flags)?;
        Ok(words
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &w)| acc | (u64::from(w) << (16 * i))))
    }

    /// Write a 16, 32, 64 or 128 bit register given as little-endian words.
    pub fn reg_write_words(
        &self,
        diaddr: u16,
        reg_addr: u16,
        reg_size_bit: u16,
        value: &[u16],
        flags: Flags,
    ) -> Result<()> {
        let req_sub = read_request_subtype(reg_size_bit) | REQ_WRITE_FLAG;
        assert_eq!(value.len(), usize::from(reg_size_bit / 16), "value does not match register size");

        let mut payload = Vec::with_capacity(1 + value.len());
        payload.push(reg_addr);
        payload.extend_from_slice(value);
        let request = Packet::with_payload(diaddr, self.diaddr, PacketType::Reg, req_sub, &payload);

        let resp = self.reg_access(request, flags)?;
        match resp.type_sub() {
            RESP_WRITE_REG_SUCCESS => {}
            RESP_WRITE_REG_ERROR => {
                log::debug!(
                    "device error writing register {:#06x} of {}",
                    reg_addr,
                    DiAddr(diaddr)
                );
                return Err(OsdError::DeviceError);
            }
            sub => {
                return Err(OsdError::DeviceInvalidData(format!(
                    "unexpected response subtype {:#x} to register write",
                    sub
                )))
            }
        }
        if resp.data_size_words() != payload2data(0) {
            return Err(OsdError::DeviceInvalidData(format!(
                "write response has {} words, expected {}",
                resp.data_size_words(),
                payload2data(0)
            )));
        }
        Ok(())
    }

    /// Write a register of up to 64 bit.
    pub fn reg_write(
        &self,
        diaddr: u16,
        reg_addr: u16,
        reg_size_bit: u16,
        value: u64,
        flags: Flags,
    ) -> Result<()> {
        assert!(reg_size_bit <= 64, "use reg_write_words for wider registers");
        let words: Vec<u16> = (0..reg_size_bit / 16)
            .map(|i| (value >> (16 * i)) as u16)
            .collect();
        self.reg_write_words(diaddr, reg_addr, reg_size_bit, &words, flags)
    }

    /// Read-modify-write a single bit. The register is written even if the
    /// bit already has the requested value.
    pub fn reg_setbit(
        &self,
        bitnum: u32,
        bitval: bool,
        diaddr: u16,
        reg_addr: u16,
        reg_size_bit: u16,
        flags: Flags,
    ) -> Result<()> {
        assert!(bitnum < u32::from(reg_size_bit), "bit {} outside register", bitnum);
        let old = self.reg_read(diaddr, reg_addr, reg_size_bit, flags)?;
        let new = if bitval { old | (1 << bitnum) } else { old & !(1 << bitnum) };
        self.reg_write(diaddr, reg_addr, reg_size_bit, new, flags)
    }

    /// Identify the module at `diaddr` from its base registers.
    pub fn describe_module(&self, diaddr: u16) -> Result<ModuleDescriptor> {
        let vendor = self.reg_read(diaddr, reg::MOD_VENDOR, 16, Flags::NONE)? as u16;
        let module_type = self.reg_read(diaddr, reg::MOD_TYPE, 16, Flags::NONE)? as u16;
        let version = self.reg_read(diaddr, reg::MOD_VERSION, 16, Flags::NONE)? as u16;
        Ok(ModuleDescriptor {
            addr: diaddr,
            vendor,
            module_type,
            version,
        })
    }

    /// Describe all modules of a subnet.
    ///
    /// Modules that can not be described are listed as unknown and the
    /// whole list is returned inside [`OsdError::PartialResult`].
    pub fn get_modules(&self, subnet: u16) -> Result<Vec<ModuleDescriptor>> {
        let num_mod = self.reg_read(diaddr::scm(subnet), reg::SCM_NUM_MOD, 16, Flags::NONE)? as u16;
        log::debug!("subnet {} has {} modules", subnet, num_mod);

        let mut modules = Vec::with_capacity(usize::from(num_mod));
        let mut partial = false;
        for local in 0..num_mod {
            let addr = diaddr::build(subnet, local);
            match self.describe_module(addr) {
                Ok(desc) => modules.push(desc),
                Err(e) => {
                    log::warn!("unable to describe module {}: {}", DiAddr(addr), e);
                    partial = true;
                    modules.push(ModuleDescriptor::unknown(addr));
                }
            }
        }
        if partial {
            Err(OsdError::PartialResult(modules))
        } else {
            Ok(modules)
        }
    }

    /// Route events of module `diaddr` to `dest`, or to this host module.
    pub fn set_event_destination(&self, diaddr: u16, dest: Option<u16>, flags: Flags) -> Result<()> {
        let dest = dest.unwrap_or(self.diaddr);
        self.reg_write(diaddr, reg::MOD_EVENT_DEST, 16, u64::from(dest), flags)
    }

    pub fn set_event_active(&self, diaddr: u16, active: bool, flags: Flags) -> Result<()> {
        self.reg_setbit(reg::MOD_CS_ACTIVE_BIT, active, diaddr, reg::MOD_CS, 16, flags)
    }

    /// Payload words of the largest event packet module `diaddr` accepts.
    pub fn get_max_event_words(&self, _diaddr: u16) -> usize {
        data2payload(MAX_PKG_LEN_WORDS)
    }

    /// Send an EVENT packet from this host module.
    pub fn event_send(&self, mut pkg: Packet) -> Result<()> {
        if pkg.packet_type() != PacketType::Event {
            return Err(OsdError::Failure(format!(
                "event_send needs an EVENT packet, got {}",
                pkg.packet_type().name()
            )));
        }
        pkg.set_src(self.diaddr);
        self.send(pkg)
    }

    /// Next queued event; only used without an event handler.
    pub fn event_receive(&self, flags: Flags) -> Result<Packet> {
        self.shared
            .wait_for(self.call_timeout(flags), |st| st.events.pop_front())
    }
}

impl Drop for HostModule {
    fn drop(&mut self) {
        if self.closer.is_some() {
            let _ = self.disconnect();
        }
    }
}

fn read_request_subtype(reg_size_bit: u16) -> u8 {
    match reg_size_bit {
        16 => REQ_READ_REG_16,
        32 => REQ_READ_REG_32,
        64 => REQ_READ_REG_64,
        128 => REQ_READ_REG_128,
        other => panic!("invalid register size {}", other),
    }
}

/// Connection handshake: claim a DI address from the host controller.
fn request_diaddr(writer: &mut dyn Writer, reader: &mut dyn Reader) -> Result<u16> {
    bus::send_message(writer, &Message::mgmt(bus::MGMT_DIADDR_REQUEST))
        .map_err(|e| OsdError::ConnectionFailed(e.to_string()))?;
    let reply = bus::recv_message(reader)
        .map_err(|e| OsdError::ConnectionFailed(e.to_string()))?;
    match reply {
        Some(Message::Mgmt(text)) => text.trim().parse::<u16>().map_err(|_| {
            OsdError::ConnectionFailed(format!("address request rejected: {}", text))
        }),
        Some(Message::Data(_)) => Err(OsdError::ConnectionFailed(
            "data packet before address assignment".into(),
        )),
        None => Err(OsdError::ConnectionFailed(
            "host controller closed the connection".into(),
        )),
    }
}

fn receive_loop(mut reader: Box<dyn Reader>, shared: Arc<Shared>) {
    // EV_CONT pieces per source address
    let mut partial: HashMap<u16, Packet> = HashMap::new();

    loop {
        let msg = match bus::recv_message(reader.as_mut()) {
            Ok(Some(m)) => m,
            Ok(None) => break,
            Err(e) => {
                log::warn!("bus read failed: {}", e);
                break;
            }
        };

        let pkg = match msg {
            Message::Mgmt(text) => {
                log::debug!("management message: {}", text);
                continue;
            }
            Message::Data(pkg) => pkg,
        };

        match pkg.packet_type() {
            PacketType::Reg => shared.deliver_response(pkg),
            PacketType::Event => {
                let src = pkg.src();
                if pkg.type_sub() == EV_CONT {
                    match partial.get_mut(&src) {
                        Some(head) => head.combine(&pkg),
                        None => {
                            partial.insert(src, pkg);
                        }
                    }
                    continue;
                }
                // only EV_LAST completes a split event, overflows and
                // other subtypes pass through unchanged
                let event = match partial.remove(&src) {
                    Some(mut head) if pkg.type_sub() == EV_LAST => {
                        head.combine(&pkg);
                        let words = head.payload().to_vec();
                        Packet::with_payload(head.dest(), src, PacketType::Event, EV_LAST, &words)
                    }
                    Some(head) => {
                        partial.insert(src, head);
                        pkg
                    }
                    None => pkg,
                };
                shared.dispatch_event(event);
            }
            other => log::warn!(
                "dropping packet of reserved type {} from {}",
                other.name(),
                DiAddr(pkg.src())
            ),
        }
    }

    shared.set_connected(false);
    log::debug!("receive loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{connected, serve_registers, setup, ScriptedConnector, OWN};
    use osd_core::constants::{
        EV_OVERFLOW, REQ_WRITE_REG_16, RESP_READ_REG_SUCCESS_16, RESP_READ_REG_SUCCESS_32,
    };
    use std::collections::HashMap;
    use std::sync::mpsc;

    #[test]
    fn connect_claims_address() {
        let (hm, _peer) = connected(None);
        assert!(hm.is_connected());
        assert_eq!(hm.diaddr(), OWN);
        assert_eq!(hm.host_controller_address(), "scripted");
    }

    #[test]
    fn connect_rejected() {
        let (mut hm, mut peer) = setup(None);
        let t = thread::spawn(move || {
            assert_eq!(peer.recv(), Message::mgmt("DIADDR_REQUEST"));
            peer.send(Message::mgmt("NACK"));
            peer
        });
        assert!(matches!(hm.connect(), Err(OsdError::ConnectionFailed(_))));
        assert!(!hm.is_connected());
        t.join().unwrap();
    }

    #[test]
    fn connect_unreachable() {
        let mut hm = HostModule::new(ScriptedConnector { link: Mutex::new(None) }, None);
        assert!(matches!(hm.connect(), Err(OsdError::ConnectionFailed(_))));
    }

    #[test]
    fn reg_write_scenario() {
        let (hm, mut peer) = connected(None);
        let t = thread::spawn(move || {
            let req = peer.recv_packet();
            assert_eq!(req.dest(), 0x05);
            assert_eq!(req.src(), OWN);
            assert_eq!(req.packet_type(), PacketType::Reg);
            assert_eq!(req.type_sub(), REQ_WRITE_REG_16);
            assert_eq!(req.payload(), &[0x200, 1]);
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_WRITE_REG_SUCCESS, &[]));
            peer
        });
        hm.reg_write(0x05, 0x200, 16, 1, Flags::NONE).unwrap();
        t.join().unwrap();
    }

    #[test]
    fn reg_read_32_little_endian() {
        let (hm, mut peer) = connected(None);
        let t = thread::spawn(move || {
            let req = peer.recv_packet();
            assert_eq!(req.type_sub(), REQ_READ_REG_32);
            assert_eq!(req.payload(), &[0x0201]);
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_READ_REG_SUCCESS_32, &[0x5678, 0x1234]));
            peer
        });
        assert_eq!(hm.reg_read(0x05, 0x0201, 32, Flags::NONE).unwrap(), 0x1234_5678);
        t.join().unwrap();
    }

    #[test]
    fn events_interleave_with_pending_read() {
        let (tx, rx) = mpsc::channel();
        let handler: EventHandler = Box::new(move |pkg| tx.send(pkg).unwrap());
        let (hm, mut peer) = connected(Some(handler));

        let t = thread::spawn(move || {
            let _req = peer.recv_packet();
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Event, EV_LAST, &[1]));
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Event, EV_LAST, &[2]));
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_READ_REG_SUCCESS_16, &[42]));
            peer
        });

        assert_eq!(hm.reg_read(0x05, 0x0200, 16, Flags::BLOCKING).unwrap(), 42);
        assert_eq!(rx.try_recv().unwrap().payload(), &[1]);
        assert_eq!(rx.try_recv().unwrap().payload(), &[2]);
        t.join().unwrap();
    }

    #[test]
    fn concurrent_calls_are_serialized() {
        let (hm, mut peer) = connected(None);
        let hm = Arc::new(hm);

        let responder = thread::spawn(move || {
            for _ in 0..2 {
                let req = peer.recv_packet();
                // echo the register address as value
                let value = req.payload()[0];
                peer.send_packet(Packet::with_payload(OWN, req.dest(), PacketType::Reg, RESP_READ_REG_SUCCESS_16, &[value]));
            }
            peer
        });

        let callers: Vec<_> = [0x0300u16, 0x0301]
            .into_iter()
            .map(|reg_addr| {
                let hm = hm.clone();
                thread::spawn(move || {
                    assert_eq!(hm.reg_read(0x05, reg_addr, 16, Flags::BLOCKING).unwrap(), u64::from(reg_addr));
                })
            })
            .collect();
        for c in callers {
            c.join().unwrap();
        }
        responder.join().unwrap();
    }

    #[test]
    fn timeout_then_late_response_is_dropped() {
        let (mut hm, mut peer) = connected(None);
        hm.set_timeout(Duration::from_millis(50));

        let first = hm.reg_read(0x06, 0x0200, 16, Flags::NONE);
        assert!(matches!(first, Err(OsdError::TimedOut)));
        let req = peer.recv_packet();
        assert_eq!(req.payload(), &[0x0200]);

        // late answer to the first call, then the answer to the second
        let t = thread::spawn(move || {
            let _req = peer.recv_packet();
            peer.send_packet(Packet::with_payload(OWN, 0x06, PacketType::Reg, RESP_READ_REG_SUCCESS_16, &[1]));
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_READ_REG_SUCCESS_16, &[2]));
            peer
        });
        assert_eq!(hm.reg_read(0x05, 0x0201, 16, Flags::BLOCKING).unwrap(), 2);
        t.join().unwrap();
    }

    #[test]
    fn late_response_from_same_module_is_dropped() {
        let (mut hm, mut peer) = connected(None);
        hm.set_timeout(Duration::from_millis(50));

        let first = hm.reg_read(0x05, 0x0200, 16, Flags::NONE);
        assert!(matches!(first, Err(OsdError::TimedOut)));
        let req = peer.recv_packet();
        assert_eq!(req.payload(), &[0x0200]);

        let t = thread::spawn(move || {
            let req = peer.recv_packet();
            assert_eq!(req.payload(), &[0x0201]);
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_READ_REG_SUCCESS_16, &[0xaaaa]));
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_READ_REG_SUCCESS_16, &[0xbbbb]));
            peer
        });
        assert_eq!(hm.reg_read(0x05, 0x0201, 16, Flags::BLOCKING).unwrap(), 0xbbbb);
        let mut peer = t.join().unwrap();

        // nothing owed any more, the next answer belongs to the next call
        let t = thread::spawn(move || {
            let _req = peer.recv_packet();
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_READ_REG_SUCCESS_16, &[0xcccc]));
            peer
        });
        assert_eq!(hm.reg_read(0x05, 0x0202, 16, Flags::BLOCKING).unwrap(), 0xcccc);
        t.join().unwrap();
    }

    #[test]
    fn device_errors() {
        let (hm, mut peer) = connected(None);
        let t = thread::spawn(move || {
            let _ = peer.recv_packet();
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_READ_REG_ERROR, &[]));
            let _ = peer.recv_packet();
            // one word too many
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_READ_REG_SUCCESS_16, &[1, 2]));
            let _ = peer.recv_packet();
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_WRITE_REG_ERROR, &[]));
            let _ = peer.recv_packet();
            peer.send_packet(Packet::with_payload(OWN, 0x05, PacketType::Reg, RESP_READ_REG_SUCCESS_16, &[]));
            peer
        });
        assert!(matches!(hm.reg_read(0x05, 0, 16, Flags::NONE), Err(OsdError::DeviceError)));
        assert!(matches!(hm.reg_read(0x05, 0, 16, Flags::NONE), Err(OsdError::DeviceInvalidData(_))));
        assert!(matches!(hm.reg_write(0x05, 0, 16, 1, Flags::NONE), Err(OsdError::DeviceError)));
        assert!(matches!(hm.reg_write(0x05, 0, 16, 1, Flags::NONE), Err(OsdError::DeviceInvalidData(_))));
        t.join().unwrap();
    }

    #[test]
    fn link_loss_wakes_pending_call() {
        let (hm, mut peer) = connected(None);
        let t = thread::spawn(move || {
            let _ = peer.recv_packet();
            peer.link.closer.close();
        });
        assert!(matches!(hm.reg_read(0x05, 0, 16, Flags::BLOCKING), Err(OsdError::NotConnected)));
        t.join().unwrap();
        assert!(!hm.is_connected());
        assert!(matches!(hm.reg_read(0x05, 0, 16, Flags::NONE), Err(OsdError::NotConnected)));
    }

    #[test]
    fn split_events_are_reassembled() {
        let (hm, mut peer) = connected(None);
        peer.send_packet(Packet::with_payload(OWN, 0x07, PacketType::Event, EV_CONT, &[1, 2]));
        peer.send_packet(Packet::with_payload(OWN, 0x08, PacketType::Event, EV_LAST, &[9]));
        peer.send_packet(Packet::with_payload(OWN, 0x07, PacketType::Event, EV_CONT, &[3]));
        peer.send_packet(Packet::with_payload(OWN, 0x07, PacketType::Event, EV_LAST, &[4]));

        let a = hm.event_receive(Flags::BLOCKING).unwrap();
        assert_eq!(a.src(), 0x08);
        assert_eq!(a.payload(), &[9]);
        let b = hm.event_receive(Flags::BLOCKING).unwrap();
        assert_eq!(b.src(), 0x07);
        assert_eq!(b.type_sub(), EV_LAST);
        assert_eq!(b.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn overflow_passes_pending_pieces() {
        let (hm, mut peer) = connected(None);
        peer.send_packet(Packet::with_payload(OWN, 0x07, PacketType::Event, EV_CONT, &[1, 2, 3, 4, 5]));
        peer.send_packet(Packet::with_payload(OWN, 0x07, PacketType::Event, EV_OVERFLOW, &[42]));
        peer.send_packet(Packet::with_payload(OWN, 0x07, PacketType::Event, EV_LAST, &[6]));

        let overflow = hm.event_receive(Flags::BLOCKING).unwrap();
        assert_eq!(overflow.type_sub(), EV_OVERFLOW);
        assert_eq!(overflow.payload(), &[42]);
        let rest = hm.event_receive(Flags::BLOCKING).unwrap();
        assert_eq!(rest.type_sub(), EV_LAST);
        assert_eq!(rest.payload(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn event_receive_times_out() {
        let (mut hm, _peer) = connected(None);
        hm.set_timeout(Duration::from_millis(20));
        assert!(matches!(hm.event_receive(Flags::NONE), Err(OsdError::TimedOut)));
    }

    #[test]
    fn event_send_stamps_source() {
        let (hm, mut peer) = connected(None);
        let pkg = Packet::with_payload(0x05, 0, PacketType::Event, EV_LAST, &[0x41]);
        hm.event_send(pkg).unwrap();
        let sent = peer.recv_packet();
        assert_eq!(sent.src(), OWN);
        assert_eq!(sent.dest(), 0x05);

        let reg = Packet::with_payload(0x05, 0, PacketType::Reg, 0, &[0]);
        assert!(matches!(hm.event_send(reg), Err(OsdError::Failure(_))));
        assert_eq!(hm.get_max_event_words(0x05), 5);
    }

    #[test]
    fn module_listing_with_failure() {
        let (hm, peer) = connected(None);
        let mut regs = HashMap::new();
        regs.insert((0x0000, reg::SCM_NUM_MOD), 3);
        for (local, ty) in [(0u16, 1u16), (2, 4)] {
            regs.insert((local, reg::MOD_VENDOR), 1);
            regs.insert((local, reg::MOD_TYPE), ty);
            regs.insert((local, reg::MOD_VERSION), 0);
        }
        let server = serve_registers(peer, regs);

        let desc = hm.describe_module(2).unwrap();
        assert_eq!(desc, ModuleDescriptor { addr: 2, vendor: 1, module_type: 4, version: 0 });

        match hm.get_modules(0) {
            Err(OsdError::PartialResult(list)) => {
                assert_eq!(list.len(), 3);
                assert_eq!(list[0].module_type, 1);
                assert_eq!(list[1], ModuleDescriptor::unknown(1));
                assert_eq!(list[2].module_type, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
        drop(hm);
        assert!(server.join().unwrap().is_empty());
    }

    #[test]
    fn event_control_writes() {
        let (hm, peer) = connected(None);
        let mut regs = HashMap::new();
        regs.insert((0x0005, reg::MOD_CS), 0);
        let server = serve_registers(peer, regs);

        hm.set_event_destination(0x05, None, Flags::NONE).unwrap();
        hm.set_event_active(0x05, true, Flags::NONE).unwrap();
        drop(hm);

        let writes = server.join().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].payload(), &[reg::MOD_EVENT_DEST, OWN]);
        assert_eq!(writes[1].payload(), &[reg::MOD_CS, 1]);
    }

    #[test]
    fn setbit_writes_even_if_unchanged() {
        let (hm, peer) = connected(None);
        let regs = HashMap::from([((0x0005, reg::MOD_CS), 1)]);
        let server = serve_registers(peer, regs);

        hm.set_event_active(0x05, true, Flags::NONE).unwrap();
        hm.reg_setbit(3, false, 0x05, reg::MOD_CS, 16, Flags::NONE).unwrap();
        drop(hm);

        let writes = server.join().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].payload(), &[reg::MOD_CS, 1]);
        assert_eq!(writes[1].payload(), &[reg::MOD_CS, 1]);
    }

    #[test]
    fn disconnect_releases_address() {
        let (mut hm, mut peer) = connected(None);
        hm.disconnect().unwrap();
        assert!(!hm.is_connected());
        assert_eq!(peer.recv(), Message::mgmt("DIADDR_RELEASE"));
        assert!(matches!(hm.disconnect(), Err(OsdError::NotConnected)));
    }
}
