//! Host controller: the broker between host modules and gateways.
//!
//! Each connected peer gets a [`PeerId`]. Host modules claim a DI address in
//! the controller's subnet with `DIADDR_REQUEST`; gateways claim a whole
//! subnet with `GW_REGISTER <subnet>`. Data packets are routed by their
//! destination address: inside the own subnet to the module owning the
//! address, to other subnets through their gateway.
//!
//! One router thread owns all routing state; listener and per-peer reader
//! threads only feed it [`Event`]s.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use osd_core::constants::{DIADDR_LOCAL_MAX, DIADDR_SUBNET_MAX};
use osd_core::diaddr::{self, DiAddr};
use osd_core::Packet;

use crate::bus::{self, memory, tcp, BusLink, Closer, Connector, Message, Reader, Writer};
use crate::event::{self, Event, EventReceiver, EventSender, PeerId, RoutingSnapshot};

/// Address the host controller listens on unless configured otherwise.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:9537";

/// Subnet of the host controller itself.
pub const DEFAULT_SUBNET: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostControllerConfig {
    pub listen: String,
    pub subnet: u16,
}

impl Default for HostControllerConfig {
    fn default() -> Self {
        HostControllerConfig {
            listen: DEFAULT_LISTEN.into(),
            subnet: DEFAULT_SUBNET,
        }
    }
}

/// A running host controller.
///
/// Stopped on drop.
pub struct HostController {
    tx: EventSender,
    next_id: Arc<AtomicU64>,
    subnet: u16,
    local_addr: Option<SocketAddr>,
    stopping: Arc<AtomicBool>,
    router: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl HostController {
    /// Bind the TCP listener and start the router. Returns immediately.
    pub fn start(config: &HostControllerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.listen)?;
        let local_addr = listener.local_addr()?;
        log::info!(
            "host controller for subnet {} listening on {}",
            config.subnet,
            local_addr
        );

        let mut ctrl = Self::start_local(config.subnet)?;
        ctrl.local_addr = Some(local_addr);

        let tx = ctrl.tx.clone();
        let next_id = ctrl.next_id.clone();
        let stopping = ctrl.stopping.clone();
        ctrl.listener = Some(
            thread::Builder::new()
                .name("hostctrl-listener".into())
                .spawn(move || listener_loop(listener, tx, next_id, stopping))?,
        );
        Ok(ctrl)
    }

    /// Start only the router; peers are attached in-process.
    pub fn start_local(subnet: u16) -> io::Result<Self> {
        assert!(subnet <= DIADDR_SUBNET_MAX, "subnet {} out of range", subnet);
        let (tx, rx) = event::channel();
        let router = thread::Builder::new()
            .name("hostctrl-router".into())
            .spawn(move || Router::new(subnet, rx).run())?;
        Ok(HostController {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            subnet,
            local_addr: None,
            stopping: Arc::new(AtomicBool::new(false)),
            router: Some(router),
            listener: None,
        })
    }

    pub fn subnet(&self) -> u16 {
        self.subnet
    }

    /// TCP address actually bound, if started with [`HostController::start`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Hand an already established link to the router.
    pub fn attach(&self, link: BusLink) -> io::Result<PeerId> {
        attach_peer(link, &self.tx, &self.next_id)
    }

    /// A connector for host modules and gateways in the same process.
    pub fn connector(&self) -> LocalConnector {
        LocalConnector {
            tx: self.tx.clone(),
            next_id: self.next_id.clone(),
        }
    }

    /// Copy of the routing tables; `None` once the router stopped.
    pub fn snapshot(&self) -> Option<RoutingSnapshot> {
        let (tx, rx) = mpsc::channel();
        self.tx.send(Event::Snapshot(tx)).ok()?;
        rx.recv_timeout(Duration::from_secs(5)).ok()
    }

    /// Stop the router and the listener, closing every peer link.
    pub fn stop(&mut self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Event::Shutdown);
        if let Some(addr) = self.local_addr {
            // wake the blocking accept()
            let _ = TcpStream::connect_timeout(&addr, Duration::from_secs(1));
        }
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.router.take() {
            let _ = handle.join();
        }
        log::info!("host controller for subnet {} stopped", self.subnet);
    }
}

impl Drop for HostController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// [`Connector`] that attaches through an in-memory link.
#[derive(Clone)]
pub struct LocalConnector {
    tx: EventSender,
    next_id: Arc<AtomicU64>,
}

impl Connector for LocalConnector {
    fn connect(&self) -> io::Result<BusLink> {
        let (ours, theirs) = memory::pair();
        attach_peer(theirs, &self.tx, &self.next_id)?;
        Ok(ours)
    }

    fn endpoint(&self) -> String {
        "inproc://hostctrl".into()
    }
}

/// Register a peer with the router and start its reader thread.
fn attach_peer(link: BusLink, tx: &EventSender, next_id: &AtomicU64) -> io::Result<PeerId> {
    let id = PeerId(next_id.fetch_add(1, Ordering::Relaxed));
    let BusLink { writer, reader, closer } = link;

    if tx.send(Event::PeerUp(id, writer, closer)).is_err() {
        return Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "host controller stopped",
        ));
    }

    let peer_tx = tx.clone();
    thread::Builder::new()
        .name(format!("hostctrl-peer-{}", id.0))
        .spawn(move || peer_reader_loop(reader, id, peer_tx))?;
    Ok(id)
}

/// Listener thread: accepts connections and attaches them as peers.
fn listener_loop(
    listener: TcpListener,
    tx: EventSender,
    next_id: Arc<AtomicU64>,
    stopping: Arc<AtomicBool>,
) {
    for stream_result in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            return;
        }
        let stream = match stream_result {
            Ok(s) => s,
            Err(e) => {
                log::warn!("accept failed: {}", e);
                continue;
            }
        };
        let peer_addr = stream.peer_addr().ok();
        let link = match tcp::link_from_stream(stream) {
            Ok(l) => l,
            Err(e) => {
                log::warn!("failed to set up link to {:?}: {}", peer_addr, e);
                continue;
            }
        };
        match attach_peer(link, &tx, &next_id) {
            Ok(id) => log::info!("peer {:?} connected as {}", peer_addr, id.0),
            // router shut down
            Err(_) => return,
        }
    }
}

/// Per-peer reader thread: forwards frames to the router.
fn peer_reader_loop(mut reader: Box<dyn Reader>, id: PeerId, tx: EventSender) {
    loop {
        match reader.recv_frame() {
            Ok(Some(data)) => {
                if tx.send(Event::Frame { peer: id, data }).is_err() {
                    return;
                }
            }
            Ok(None) => {
                log::info!("peer {} disconnected", id.0);
                let _ = tx.send(Event::PeerDown(id));
                return;
            }
            Err(e) => {
                log::warn!("peer {} read error: {}", id.0, e);
                let _ = tx.send(Event::PeerDown(id));
                return;
            }
        }
    }
}

// =============================================================================
// Router
// =============================================================================

struct Peer {
    writer: Box<dyn Writer>,
    closer: Box<dyn Closer>,
}

struct Router {
    subnet: u16,
    rx: EventReceiver,
    peers: HashMap<PeerId, Peer>,
    /// local address -> owning host module
    modules: BTreeMap<u16, PeerId>,
    /// subnet -> gateway
    gateways: BTreeMap<u16, PeerId>,
}

impl Router {
    fn new(subnet: u16, rx: EventReceiver) -> Self {
        Router {
            subnet,
            rx,
            peers: HashMap::new(),
            modules: BTreeMap::new(),
            gateways: BTreeMap::new(),
        }
    }

    fn run(&mut self) {
        loop {
            let event = match self.rx.recv() {
                Ok(e) => e,
                Err(_) => break, // all senders dropped
            };
            match event {
                Event::Frame { peer, data } => self.handle_frame(peer, &data),
                Event::PeerUp(id, writer, closer) => {
                    log::debug!("peer {} up", id.0);
                    self.peers.insert(id, Peer { writer, closer });
                }
                Event::PeerDown(id) => self.peer_down(id),
                Event::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Event::Shutdown => break,
            }
        }
        for (_, peer) in self.peers.drain() {
            peer.closer.close();
        }
    }

    fn snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot {
            subnet: self.subnet,
            modules: self
                .modules
                .keys()
                .map(|&local| diaddr::build(self.subnet, local))
                .collect(),
            gateways: self.gateways.keys().copied().collect(),
            peers: self.peers.len(),
        }
    }

    fn handle_frame(&mut self, peer: PeerId, data: &[u8]) {
        if !self.peers.contains_key(&peer) {
            return;
        }
        match Message::decode(data) {
            Ok(Message::Mgmt(request)) => self.handle_mgmt(peer, &request),
            Ok(Message::Data(pkg)) => self.route(peer, pkg),
            Err(e) => log::error!("dropping message from peer {}: {}", peer.0, e),
        }
    }

    fn send(&mut self, peer: PeerId, msg: &Message) {
        if let Some(p) = self.peers.get_mut(&peer) {
            if let Err(e) = bus::send_message(p.writer.as_mut(), msg) {
                log::warn!("send to peer {} failed: {}", peer.0, e);
            }
        }
    }

    fn reply(&mut self, peer: PeerId, ok: bool) {
        let text = if ok { bus::MGMT_ACK } else { bus::MGMT_NACK };
        self.send(peer, &Message::mgmt(text));
    }

    fn handle_mgmt(&mut self, peer: PeerId, request: &str) {
        log::debug!("management message from peer {}: {}", peer.0, request);
        let (cmd, params) = match request.split_once(' ') {
            Some((cmd, params)) => (cmd, params.trim()),
            None => (request, ""),
        };
        match cmd {
            bus::MGMT_DIADDR_REQUEST => self.diaddr_request(peer),
            bus::MGMT_DIADDR_RELEASE => {
                let ok = self.diaddr_release(peer);
                self.reply(peer, ok);
            }
            bus::MGMT_GW_REGISTER => {
                let ok = self.gw_register(peer, params);
                self.reply(peer, ok);
            }
            bus::MGMT_GW_UNREGISTER => {
                let ok = self.gw_unregister(peer, params);
                self.reply(peer, ok);
            }
            _ => {
                log::warn!("unknown management request '{}' from peer {}", request, peer.0);
                self.reply(peer, true);
            }
        }
    }

    fn diaddr_request(&mut self, peer: PeerId) {
        let free = (1..=DIADDR_LOCAL_MAX).find(|local| !self.modules.contains_key(local));
        let local = match free {
            Some(l) => l,
            None => {
                log::error!("no free DI address left in subnet {}", self.subnet);
                self.reply(peer, false);
                return;
            }
        };
        self.modules.insert(local, peer);
        let addr = diaddr::build(self.subnet, local);
        log::debug!("assigned DI address {} to peer {}", DiAddr(addr), peer.0);
        self.send(peer, &Message::Mgmt(addr.to_string()));
    }

    fn diaddr_release(&mut self, peer: PeerId) -> bool {
        let local = self
            .modules
            .iter()
            .find(|(_, &owner)| owner == peer)
            .map(|(&local, _)| local);
        match local {
            Some(local) => {
                self.modules.remove(&local);
                log::debug!(
                    "released DI address {} of peer {}",
                    DiAddr(diaddr::build(self.subnet, local)),
                    peer.0
                );
                true
            }
            None => {
                log::error!("peer {} releases an address it does not own", peer.0);
                false
            }
        }
    }

    fn parse_subnet(params: &str) -> Option<u16> {
        params.parse::<u16>().ok().filter(|&s| s <= DIADDR_SUBNET_MAX)
    }

    fn gw_register(&mut self, peer: PeerId, params: &str) -> bool {
        let subnet = match Self::parse_subnet(params) {
            Some(s) => s,
            None => {
                log::error!("invalid gateway subnet '{}'", params);
                return false;
            }
        };
        if self.gateways.contains_key(&subnet) {
            log::error!("a gateway for subnet {} is already registered", subnet);
            return false;
        }
        self.gateways.insert(subnet, peer);
        log::info!("registered peer {} as gateway for subnet {}", peer.0, subnet);
        true
    }

    fn gw_unregister(&mut self, peer: PeerId, params: &str) -> bool {
        let subnet = match Self::parse_subnet(params) {
            Some(s) => s,
            None => {
                log::error!("invalid gateway subnet '{}'", params);
                return false;
            }
        };
        match self.gateways.get(&subnet) {
            None => {
                log::error!("no gateway registered for subnet {}", subnet);
                false
            }
            Some(&owner) if owner != peer => {
                log::error!("peer {} is not the gateway for subnet {}", peer.0, subnet);
                false
            }
            Some(_) => {
                self.gateways.remove(&subnet);
                log::info!("unregistered gateway for subnet {}", subnet);
                true
            }
        }
    }

    fn route(&mut self, from: PeerId, pkg: Packet) {
        let dest = pkg.dest();
        let dest_subnet = diaddr::subnet(dest);

        let target = if dest_subnet == self.subnet {
            match self.modules.get(&diaddr::local(dest)) {
                Some(&p) => p,
                None => {
                    log::error!(
                        "no destination module registered for DI address {}",
                        DiAddr(dest)
                    );
                    return;
                }
            }
        } else {
            match self.gateways.get(&dest_subnet) {
                Some(&p) => p,
                None => {
                    log::error!(
                        "no gateway for subnet {} registered to route DI address {}, packet coming from peer {}",
                        dest_subnet,
                        DiAddr(dest),
                        from.0
                    );
                    return;
                }
            }
        };

        log::trace!("routing packet for {} to peer {}", DiAddr(dest), target.0);
        self.send(target, &Message::Data(pkg));
    }

    fn peer_down(&mut self, id: PeerId) {
        if let Some(peer) = self.peers.remove(&id) {
            peer.closer.close();
        }
        let before = self.modules.len() + self.gateways.len();
        self.modules.retain(|_, owner| *owner != id);
        self.gateways.retain(|_, owner| *owner != id);
        let released = before - self.modules.len() - self.gateways.len();
        if released > 0 {
            log::info!("peer {} gone, released {} registrations", id.0, released);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::recv_message;
    use osd_core::PacketType;

    struct TestPeer {
        link: BusLink,
    }

    impl TestPeer {
        fn connect(ctrl: &HostController) -> Self {
            TestPeer { link: ctrl.connector().connect().unwrap() }
        }

        fn send(&mut self, msg: Message) {
            bus::send_message(self.link.writer.as_mut(), &msg).unwrap();
        }

        fn recv(&mut self) -> Message {
            recv_message(self.link.reader.as_mut()).unwrap().unwrap()
        }

        fn request(&mut self, text: &str) -> String {
            self.send(Message::mgmt(text));
            match self.recv() {
                Message::Mgmt(reply) => reply,
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn diaddr_assignment_is_sequential() {
        let ctrl = HostController::start_local(1).unwrap();
        let mut a = TestPeer::connect(&ctrl);
        let mut b = TestPeer::connect(&ctrl);
        assert_eq!(a.request("DIADDR_REQUEST"), "1025");
        assert_eq!(b.request("DIADDR_REQUEST"), "1026");

        assert_eq!(a.request("DIADDR_RELEASE"), "ACK");
        assert_eq!(a.request("DIADDR_RELEASE"), "NACK");

        // the freed address is handed out again
        let mut c = TestPeer::connect(&ctrl);
        assert_eq!(c.request("DIADDR_REQUEST"), "1025");
    }

    #[test]
    fn gateway_registration() {
        let ctrl = HostController::start_local(1).unwrap();
        let mut gw = TestPeer::connect(&ctrl);
        let mut other = TestPeer::connect(&ctrl);

        assert_eq!(gw.request("GW_REGISTER 2"), "ACK");
        assert_eq!(other.request("GW_REGISTER 2"), "NACK");
        assert_eq!(other.request("GW_UNREGISTER 2"), "NACK");
        assert_eq!(gw.request("GW_REGISTER 99"), "NACK");
        assert_eq!(gw.request("GW_REGISTER x"), "NACK");

        let snap = ctrl.snapshot().unwrap();
        assert_eq!(snap.gateways, vec![2]);

        assert_eq!(gw.request("GW_UNREGISTER 2"), "ACK");
        assert_eq!(gw.request("GW_UNREGISTER 2"), "NACK");
    }

    #[test]
    fn routes_local_and_through_gateway() {
        let ctrl = HostController::start_local(1).unwrap();
        let mut host = TestPeer::connect(&ctrl);
        let mut gw = TestPeer::connect(&ctrl);
        let addr: u16 = host.request("DIADDR_REQUEST").parse().unwrap();
        assert_eq!(gw.request("GW_REGISTER 0"), "ACK");

        let to_device = Packet::with_payload(0x0000, addr, PacketType::Reg, 0, &[0x0202]);
        host.send(Message::Data(to_device.clone()));
        assert_eq!(gw.recv(), Message::Data(to_device));

        let to_host = Packet::with_payload(addr, 0x0000, PacketType::Reg, 8, &[5]);
        gw.send(Message::Data(to_host.clone()));
        assert_eq!(host.recv(), Message::Data(to_host));
    }

    #[test]
    fn unroutable_packets_are_dropped() {
        let ctrl = HostController::start_local(1).unwrap();
        let mut host = TestPeer::connect(&ctrl);
        let addr: u16 = host.request("DIADDR_REQUEST").parse().unwrap();

        // to subnet 3 (no gateway) and to an unclaimed local address
        host.send(Message::Data(Packet::with_payload(0x0c00, addr, PacketType::Reg, 0, &[0])));
        host.send(Message::Data(Packet::with_payload(0x0500, addr, PacketType::Reg, 0, &[0])));
        host.send(Message::Data(Packet::with_payload(addr, addr, PacketType::Event, 0, &[7])));
        match host.recv() {
            Message::Data(pkg) => assert_eq!(pkg.payload(), &[7]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_request_is_acked() {
        let ctrl = HostController::start_local(1).unwrap();
        let mut p = TestPeer::connect(&ctrl);
        assert_eq!(p.request("HELLO"), "ACK");
    }

    #[test]
    fn peer_down_releases_registrations() {
        let ctrl = HostController::start_local(1).unwrap();
        let mut p = TestPeer::connect(&ctrl);
        assert_eq!(p.request("DIADDR_REQUEST"), "1025");
        assert_eq!(p.request("GW_REGISTER 4"), "ACK");
        p.link.closer.close();
        drop(p);

        for _ in 0..200 {
            if ctrl.snapshot().unwrap().gateways.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let mut q = TestPeer::connect(&ctrl);
        assert_eq!(q.request("GW_REGISTER 4"), "ACK");
        let snap = ctrl.snapshot().unwrap();
        assert!(snap.modules.is_empty());
        assert_eq!(snap.gateways, vec![4]);
    }

    #[test]
    fn tcp_peers() {
        let config = HostControllerConfig {
            listen: "127.0.0.1:0".into(),
            subnet: 2,
        };
        let mut ctrl = HostController::start(&config).unwrap();
        let addr = ctrl.local_addr().unwrap();

        let mut link = tcp::TcpConnector::new(addr.to_string()).connect().unwrap();
        bus::send_message(link.writer.as_mut(), &Message::mgmt("DIADDR_REQUEST")).unwrap();
        let reply = recv_message(link.reader.as_mut()).unwrap().unwrap();
        assert_eq!(reply, Message::Mgmt(diaddr::build(2, 1).to_string()));

        ctrl.stop();
        assert_eq!(recv_message(link.reader.as_mut()).unwrap_or(None), None);
    }
}
