//! Byte-level serial primitives the radio transport is built on.
//!
//! [`SerialLink`] is the only way bytes reach the modem. The hardware implementation wraps a
//! `serialport` handle; [`DetachedSerial`] stands in when no port could be opened (every
//! exchange then times out and the radio is reported absent); [`MockSerial`] is a scriptable
//! modem for tests.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

/// Non-blocking byte channel to the radio module.
pub trait SerialLink {
    /// Bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
}

#[cfg(feature = "serial")]
pub use hardware::HardwareSerial;

#[cfg(feature = "serial")]
mod hardware {
    use super::SerialLink;
    use crate::radio::RadioError;
    use log::debug;
    use serialport::SerialPort;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    /// USB/UART connection to the modem.
    pub struct HardwareSerial {
        port: Box<dyn SerialPort>,
    }

    impl HardwareSerial {
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, RadioError> {
            // Reads are only issued when bytes are waiting, so the timeout is a backstop.
            let mut builder =
                serialport::new(port_name, baud_rate).timeout(Duration::from_millis(10));
            #[cfg(unix)]
            {
                builder = builder
                    .data_bits(serialport::DataBits::Eight)
                    .stop_bits(serialport::StopBits::One)
                    .parity(serialport::Parity::None);
            }
            let port = builder.open().map_err(|source| RadioError::Open {
                port: port_name.to_string(),
                source,
            })?;
            debug!("Opened {} at {} baud (8N1)", port_name, baud_rate);
            Ok(Self { port })
        }
    }

    impl SerialLink for HardwareSerial {
        fn bytes_available(&mut self) -> io::Result<usize> {
            self.port
                .bytes_to_read()
                .map(|n| n as usize)
                .map_err(io::Error::from)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.port.write_all(data)?;
            self.port.flush()
        }
    }
}

/// Serial link with nothing attached: reads are always empty, writes vanish.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSerial;

impl SerialLink for DetachedSerial {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockState {
    rx: VecDeque<u8>,
    written: Vec<String>,
    replies: Vec<(String, String)>,
    fail_writes: bool,
}

/// Scriptable modem. Clones share state, so a test keeps one handle while the transport owns
/// another.
///
/// Each written command is matched against registered `(prefix, reply)` rules in order; the
/// first match queues its reply (plus `\r\n`) for reading. Unmatched commands get no answer.
#[derive(Debug, Default, Clone)]
pub struct MockSerial {
    state: Rc<RefCell<MockState>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `reply`. A reply may hold several lines.
    pub fn respond(&self, prefix: &str, reply: &str) -> &Self {
        self.state
            .borrow_mut()
            .replies
            .push((prefix.to_string(), reply.to_string()));
        self
    }

    /// Answer every command with `+OK`.
    pub fn acknowledge_all(&self) -> &Self {
        self.respond("AT", "+OK")
    }

    /// Queue an unsolicited inbound line (a `\r\n` is appended).
    pub fn push_line(&self, line: &str) {
        let mut state = self.state.borrow_mut();
        state.rx.extend(line.as_bytes());
        state.rx.extend(b"\r\n");
    }

    /// Queue raw inbound bytes.
    pub fn push_bytes(&self, data: &[u8]) {
        self.state.borrow_mut().rx.extend(data);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }

    /// Commands written so far, without line terminators.
    pub fn written(&self) -> Vec<String> {
        self.state.borrow().written.clone()
    }

    pub fn clear_written(&self) {
        self.state.borrow_mut().written.clear();
    }

    pub fn pending_rx(&self) -> usize {
        self.state.borrow().rx.len()
    }
}

impl SerialLink for MockSerial {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.state.borrow().rx.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        let text = String::from_utf8_lossy(data);
        for command in text.split(['\r', '\n']).filter(|s| !s.is_empty()) {
            state.written.push(command.to_string());
            let reply = state
                .replies
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|(_, reply)| reply.clone());
            if let Some(reply) = reply {
                state.rx.extend(reply.as_bytes());
                state.rx.extend(b"\r\n");
            }
        }
        Ok(())
    }
}
