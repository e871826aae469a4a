//! Stop requests from SIGINT/SIGTERM.

use std::sync::mpsc;
use std::sync::Mutex;

static STOP_TX: Mutex<Option<mpsc::Sender<()>>> = Mutex::new(None);

extern "C" fn signal_handler(_sig: libc::c_int) {
    if let Ok(guard) = STOP_TX.try_lock() {
        if let Some(ref tx) = *guard {
            let _ = tx.send(());
        }
    }
}

/// Install SIGINT and SIGTERM handlers.
///
/// The returned receiver yields one `()` per signal. Other parts of the
/// program may send on the sender to request a stop as well.
pub fn stop_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel();
    if let Ok(mut guard) = STOP_TX.lock() {
        guard.replace(tx.clone());
    }
    unsafe {
        libc::signal(libc::SIGINT, signal_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, signal_handler as *const () as libc::sighandler_t);
    }
    (tx, rx)
}
