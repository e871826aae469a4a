//! In-process bus links over channels.
//!
//! Used to attach host modules to a host controller running in the same
//! process, and by tests.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use super::{BusLink, Closer, Reader, Writer};

enum Item {
    Frame(Vec<u8>),
    Closed,
}

struct MemWriter {
    tx: Sender<Item>,
}

impl Writer for MemWriter {
    fn send_frame(&mut self, data: &[u8]) -> io::Result<()> {
        self.tx
            .send(Item::Frame(data.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }
}

impl Drop for MemWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(Item::Closed);
    }
}

struct MemReader {
    rx: Receiver<Item>,
    closed: bool,
}

impl Reader for MemReader {
    fn recv_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv() {
            Ok(Item::Frame(data)) => Ok(Some(data)),
            Ok(Item::Closed) | Err(_) => {
                self.closed = true;
                Ok(None)
            }
        }
    }
}

/// Closes both directions: wakes the local reader and the peer's reader.
struct MemCloser {
    senders: Mutex<Vec<Sender<Item>>>,
}

impl Closer for MemCloser {
    fn close(&self) {
        let senders = match self.senders.lock() {
            Ok(mut s) => std::mem::take(&mut *s),
            Err(_) => return,
        };
        for tx in senders {
            let _ = tx.send(Item::Closed);
        }
    }
}

/// Two connected links; frames written on one are read on the other.
pub fn pair() -> (BusLink, BusLink) {
    let (a_tx, a_rx) = mpsc::channel();
    let (b_tx, b_rx) = mpsc::channel();

    let a = BusLink {
        writer: Box::new(MemWriter { tx: b_tx.clone() }),
        reader: Box::new(MemReader { rx: a_rx, closed: false }),
        closer: Box::new(MemCloser {
            senders: Mutex::new(vec![a_tx.clone(), b_tx.clone()]),
        }),
    };
    let b = BusLink {
        writer: Box::new(MemWriter { tx: a_tx.clone() }),
        reader: Box::new(MemReader { rx: b_rx, closed: false }),
        closer: Box::new(MemCloser {
            senders: Mutex::new(vec![b_tx, a_tx]),
        }),
    };
    (a, b)
}
