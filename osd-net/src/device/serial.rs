//! Device link over a serial port, using libc termios.
//!
//! The port is put into raw 8N1 mode without flow control. Reads poll with a
//! short timeout so that closing the link from another thread ends a
//! blocked read.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::dtd::{DtdReader, DtdWriter};
use super::{DeviceLink, DeviceOpener};
use crate::bus::Closer;
use crate::error::{OsdError, Result};

const POLL_INTERVAL_MS: i32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub path: String,
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            path: "/dev/ttyUSB0".into(),
            baud: 115200,
        }
    }
}

/// A configured serial port file descriptor.
pub struct SerialPort {
    fd: RawFd,
}

impl SerialPort {
    /// Open and configure a serial port.
    pub fn open(config: &SerialConfig) -> io::Result<Self> {
        let speed = baud_to_speed(config.baud)?;
        let c_path = std::ffi::CString::new(config.path.as_str())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid path"))?;

        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let port = SerialPort { fd };

        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
            return Err(io::Error::last_os_error());
        }

        // raw 8N1, no modem control lines, no flow control
        unsafe { libc::cfmakeraw(&mut termios) };
        termios.c_cflag &= !(libc::CSTOPB | libc::CRTSCTS);
        termios.c_cflag |= libc::CLOCAL | libc::CREAD;
        termios.c_cc[libc::VMIN] = 1;
        termios.c_cc[libc::VTIME] = 0;

        unsafe {
            libc::cfsetispeed(&mut termios, speed);
            libc::cfsetospeed(&mut termios, speed);
        }
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
            return Err(io::Error::last_os_error());
        }

        // back to blocking writes; reads go through poll()
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(port)
    }

    /// A new `File` on a dup'd descriptor.
    pub fn try_clone_file(&self) -> io::Result<File> {
        let new_fd = unsafe { libc::dup(self.fd) };
        if new_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { File::from_raw_fd(new_fd) })
    }
}

impl AsRawFd for SerialPort {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// `speed_t` of the baud rates debug UARTs run at.
fn baud_to_speed(baud: u32) -> io::Result<libc::speed_t> {
    let speed = match baud {
        9600 => libc::B9600,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        460800 => libc::B460800,
        921600 => libc::B921600,
        1000000 => libc::B1000000,
        2000000 => libc::B2000000,
        3000000 => libc::B3000000,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {}", baud),
            ))
        }
    };
    Ok(speed)
}

/// Read half that gives up once the link is closed.
struct PollingReader {
    file: File,
    closed: Arc<AtomicBool>,
}

impl Read for PollingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "serial link closed"));
            }
            let mut pfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let ret = unsafe { libc::poll(&mut pfd, 1, POLL_INTERVAL_MS) };
            if ret < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }
            if ret == 0 {
                continue;
            }
            if pfd.revents & libc::POLLIN != 0 {
                return self.file.read(buf);
            }
            if pfd.revents & (libc::POLLHUP | libc::POLLERR) != 0 {
                return Ok(0);
            }
        }
    }
}

struct SerialCloser {
    closed: Arc<AtomicBool>,
}

impl Closer for SerialCloser {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Opens the serial port as a device link.
#[derive(Debug, Clone)]
pub struct SerialDevice {
    config: SerialConfig,
}

impl SerialDevice {
    pub fn new(config: SerialConfig) -> Self {
        SerialDevice { config }
    }
}

impl DeviceOpener for SerialDevice {
    fn open(&self) -> Result<DeviceLink> {
        let port = SerialPort::open(&self.config)
            .map_err(|e| OsdError::ConnectionFailed(format!("{}: {}", self.config.path, e)))?;
        let closed = Arc::new(AtomicBool::new(false));
        let reader = PollingReader {
            file: port.try_clone_file()?,
            closed: closed.clone(),
        };
        let writer = port.try_clone_file()?;
        Ok(DeviceLink {
            reader: Box::new(DtdReader::new(reader)),
            writer: Box::new(DtdWriter::new(writer)),
            closer: Box::new(SerialCloser { closed }),
        })
    }

    fn name(&self) -> String {
        format!("{}@{}", self.config.path, self.config.baud)
    }
}
