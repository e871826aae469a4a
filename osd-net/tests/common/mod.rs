//! A simulated chip behind a TCP debug port, and a running OSD stack
//! around it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use osd_core::constants::{
    EV_CONT, EV_LAST, REQ_READ_REG_16, REQ_WRITE_REG_16, RESP_READ_REG_ERROR,
    RESP_READ_REG_SUCCESS_16, RESP_WRITE_REG_ERROR, RESP_WRITE_REG_SUCCESS,
};
use osd_core::mam::unpack_words;
use osd_core::{reg, ModuleType, Packet, PacketType};
use osd_net::bus::tcp::TcpConnector;
use osd_net::device::dtd::{DtdReader, DtdWriter};
use osd_net::device::tcp::TcpDevice;
use osd_net::device::{DeviceReader, DeviceWriter};
use osd_net::{Gateway, HostController, HostControllerConfig, HostModule};

pub const DEVICE_SUBNET: u16 = 0;
pub const HOST_SUBNET: u16 = 1;

pub const SCM: u16 = 0;
pub const UART: u16 = 1;
pub const MAM: u16 = 2;
pub const STM: u16 = 3;
pub const CTM: u16 = 4;

pub const SYSTEM_VENDOR: u16 = 2;
pub const SYSTEM_DEVICE: u16 = 0x0d;
pub const MEM_SIZE: usize = 0x1000;

/// Text the STM prints once it is activated.
pub const STM_OUTPUT: &str = "boot ok\n";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `cond` until it holds or `timeout` passed.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

// =============================================================================
// Simulated chip
// =============================================================================

struct Chip {
    regs: HashMap<(u16, u16), u16>,
    mem: Vec<u8>,
    /// MAM transfer bytes received so far
    mam_stream: Vec<u8>,
    out: Vec<Packet>,
}

fn identity(regs: &mut HashMap<(u16, u16), u16>, local: u16, ty: ModuleType) {
    regs.insert((local, reg::MOD_VENDOR), 1);
    regs.insert((local, reg::MOD_TYPE), ty.id());
    regs.insert((local, reg::MOD_VERSION), 0);
    regs.insert((local, reg::MOD_CS), 0);
    regs.insert((local, reg::MOD_EVENT_DEST), 0);
}

impl Chip {
    fn new() -> Self {
        let mut regs = HashMap::new();
        identity(&mut regs, SCM, ModuleType::Scm);
        regs.insert((SCM, reg::SCM_SYSTEM_VENDOR_ID), SYSTEM_VENDOR);
        regs.insert((SCM, reg::SCM_SYSTEM_DEVICE_ID), SYSTEM_DEVICE);
        regs.insert((SCM, reg::SCM_NUM_MOD), 5);
        regs.insert((SCM, reg::SCM_MAX_PKT_LEN), 12);
        regs.insert((SCM, reg::SCM_SYSRST), 0b10);

        identity(&mut regs, UART, ModuleType::DemUart);

        identity(&mut regs, MAM, ModuleType::Mam);
        regs.insert((MAM, reg::MAM_AW), 32);
        regs.insert((MAM, reg::MAM_DW), 32);
        regs.insert((MAM, reg::MAM_REGIONS), 1);
        for w in 0..4 {
            regs.insert((MAM, reg::mam_region_baseaddr(0, w)), 0);
            let size = if w == 0 { MEM_SIZE as u16 } else { 0 };
            regs.insert((MAM, reg::mam_region_memsize(0, w)), size);
        }

        identity(&mut regs, STM, ModuleType::Stm);
        regs.insert((STM, reg::STM_VALWIDTH), 32);

        identity(&mut regs, CTM, ModuleType::Ctm);
        regs.insert((CTM, reg::CTM_ADDR_WIDTH), 32);

        Chip {
            regs,
            mem: vec![0; MEM_SIZE],
            mam_stream: Vec::new(),
            out: Vec::new(),
        }
    }

    fn handle(&mut self, pkg: Packet) {
        let local = osd_core::diaddr::local(pkg.dest());
        match pkg.packet_type() {
            PacketType::Reg => self.handle_reg(local, &pkg),
            PacketType::Event => match local {
                UART => {
                    // echo
                    let c = pkg.payload()[0];
                    self.out.push(Packet::with_payload(pkg.src(), UART, PacketType::Event, EV_LAST, &[c]));
                }
                MAM => self.handle_mam(&pkg),
                _ => {}
            },
            _ => {}
        }
    }

    fn handle_reg(&mut self, local: u16, req: &Packet) {
        let reg_addr = req.payload()[0];
        let respond = |sub: u8, payload: &[u16]| {
            Packet::with_payload(req.src(), req.dest(), PacketType::Reg, sub, payload)
        };
        let resp = match req.type_sub() {
            REQ_READ_REG_16 => match self.regs.get(&(local, reg_addr)) {
                Some(&v) => respond(RESP_READ_REG_SUCCESS_16, &[v]),
                None => respond(RESP_READ_REG_ERROR, &[]),
            },
            REQ_WRITE_REG_16 if self.regs.contains_key(&(local, reg_addr)) => {
                let value = req.payload()[1];
                self.regs.insert((local, reg_addr), value);
                let resp = respond(RESP_WRITE_REG_SUCCESS, &[]);
                self.out.push(resp);
                if reg_addr == reg::MOD_CS && value & 1 != 0 {
                    self.start_trace(local);
                }
                return;
            }
            _ => respond(RESP_WRITE_REG_ERROR, &[]),
        };
        self.out.push(resp);
    }

    fn start_trace(&mut self, local: u16) {
        let dest = self.regs[&(local, reg::MOD_EVENT_DEST)];
        match local {
            STM => {
                for (i, c) in STM_OUTPUT.bytes().enumerate() {
                    let ts = 1000 + i as u16;
                    let payload = [ts, 0, osd_core::constants::STM_PRINT_EVENT_ID, u16::from(c), 0];
                    self.out.push(Packet::with_payload(dest, STM, PacketType::Event, EV_LAST, &payload));
                }
            }
            CTM => {
                // timestamp 7, npc 0x8000_0100, pc 0x8000_00fc, call; split in two
                let words = [7, 0, 0x0100, 0x8000, 0x00fc, 0x8000, 0b01000];
                self.out.push(Packet::with_payload(dest, CTM, PacketType::Event, EV_CONT, &words[..5]));
                self.out.push(Packet::with_payload(dest, CTM, PacketType::Event, EV_LAST, &words[5..]));
            }
            _ => {}
        }
    }

    fn handle_mam(&mut self, pkg: &Packet) {
        unpack_words(pkg.payload(), &mut self.mam_stream);
        let (aw, dw) = (4, 4);
        while self.mam_stream.len() >= 2 + aw {
            let hdr = self.mam_stream[0];
            let (we, burst, sync) = (hdr & 0x80 != 0, hdr & 0x40 != 0, hdr & 0x20 != 0);
            let selsize = self.mam_stream[1] as usize;
            let addr = self.mam_stream[2..2 + aw]
                .iter()
                .fold(0usize, |a, &b| (a << 8) | usize::from(b));
            let nbyte = if burst { selsize * dw } else { dw };
            let need = 2 + aw + if we { nbyte } else { 0 };
            if self.mam_stream.len() < need {
                return;
            }
            let data: Vec<u8> = self.mam_stream.drain(..need).skip(2 + aw).collect();

            if we {
                for (i, b) in data.into_iter().enumerate() {
                    if burst || selsize & (1 << i) != 0 {
                        self.mem[addr + i] = b;
                    }
                }
                if sync {
                    self.out.push(Packet::with_payload(pkg.src(), pkg.dest(), PacketType::Event, EV_LAST, &[]));
                }
            } else {
                for chunk in self.mem[addr..addr + nbyte].chunks(10) {
                    let words: Vec<u16> = chunk
                        .chunks(2)
                        .map(|c| u16::from_be_bytes([c[0], c[1]]))
                        .collect();
                    self.out.push(Packet::with_payload(pkg.src(), pkg.dest(), PacketType::Event, EV_LAST, &words));
                }
            }
        }
    }
}

/// Serve one debug connection on an ephemeral port. The thread ends when
/// the gateway closes the link.
pub fn start_chip() -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve_chip(stream);
    });
    (addr, handle)
}

fn serve_chip(stream: TcpStream) {
    let mut writer = DtdWriter::new(stream.try_clone().unwrap());
    let mut reader = DtdReader::new(stream);
    let mut chip = Chip::new();
    while let Ok(pkg) = reader.read_packet() {
        chip.handle(pkg);
        for out in chip.out.drain(..) {
            if writer.write_packet(&out).is_err() {
                return;
            }
        }
    }
}

// =============================================================================
// Stack
// =============================================================================

/// Host controller, a gateway to the simulated chip and the chip itself.
pub struct Stack {
    pub hostctrl: HostController,
    pub gateway: Gateway,
    pub hostctrl_addr: String,
    pub chip: Option<JoinHandle<()>>,
}

impl Stack {
    pub fn start() -> Self {
        init_logging();
        let hostctrl = HostController::start(&HostControllerConfig {
            listen: "127.0.0.1:0".into(),
            subnet: HOST_SUBNET,
        })
        .unwrap();
        let hostctrl_addr = hostctrl.local_addr().unwrap().to_string();

        let (chip_addr, chip) = start_chip();
        let mut gateway = Gateway::new(
            TcpConnector::new(hostctrl_addr.clone()),
            DEVICE_SUBNET,
            TcpDevice::new(chip_addr.to_string()),
        );
        gateway.connect().unwrap();

        Stack {
            hostctrl,
            gateway,
            hostctrl_addr,
            chip: Some(chip),
        }
    }

    pub fn host_module(&self, handler: Option<osd_net::EventHandler>) -> HostModule {
        let mut hm = HostModule::new(TcpConnector::new(self.hostctrl_addr.clone()), handler);
        hm.connect().unwrap();
        hm
    }
}

/// DI address of module `local` on the chip.
pub fn chip_addr(local: u16) -> u16 {
    osd_core::diaddr::build(DEVICE_SUBNET, local)
}
