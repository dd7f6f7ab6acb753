//! Serial transport for a BSL session.
//!
//! The transport owns the serial device exclusively for the duration of a
//! session: blocking writes, length-bounded reads with a retry budget, and
//! an in-session line-rate change that closes and reopens the port so both
//! endpoints switch in lock-step.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, trace};
use serialport::{ClearBuffer, SerialPort, SerialPortSettings};

use crate::error::Error;

/// The BSL ROM always comes up at 9600 baud after entry.
pub const INITIAL_BAUD: u32 = 9_600;

/// Inter-byte timer for a single blocking read.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Consecutive empty reads tolerated before a read is abandoned.
const MAX_TIMEOUT_TRIES: u32 = 10;

/// The line settings the BSL expects: 8-N-1, no flow control.
fn port_settings(baud_rate: u32) -> SerialPortSettings {
    SerialPortSettings {
        baud_rate,
        data_bits: serialport::DataBits::Eight,
        flow_control: serialport::FlowControl::None,
        parity: serialport::Parity::None,
        stop_bits: serialport::StopBits::One,
        timeout: READ_TIMEOUT,
    }
}

/// Byte-level access to the target, separated from the protocol so a
/// scripted double can stand in for the device under test.
pub trait Transport {
    /// Writes the whole of `buf` or fails.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Error>;

    /// Reads exactly `len` bytes, tolerating a bounded number of
    /// consecutive timeouts while data trickles in.
    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, Error>;

    /// Discards in-flight data and reconfigures the line to `baud_rate`.
    fn change_baud(&mut self, baud_rate: u32) -> Result<(), Error>;
}

/// A [`Transport`] over a real serial device.
pub struct SerialTransport {
    path: PathBuf,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Opens the given serial device at the rate the ROM starts out with.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SerialTransport, Error> {
        SerialTransport::open_with_baud_rate(path, INITIAL_BAUD)
    }

    /// Opens the given serial device at an explicit line rate.
    pub fn open_with_baud_rate<P: AsRef<Path>>(
        path: P,
        baud_rate: u32,
    ) -> Result<SerialTransport, Error> {
        let path = path.as_ref().to_path_buf();

        debug!("Opening serial port {:?} at {} baud", path, baud_rate);
        let port = serialport::open_with_settings(path.as_os_str(), &port_settings(baud_rate))
            .map_err(|source| Error::Open {
                path: path.display().to_string(),
                source,
            })?;

        Ok(SerialTransport {
            path,
            baud_rate,
            port: Some(port),
        })
    }

    /// The rate the port is currently configured for.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Closes the port. Safe to call more than once; dropping the
    /// transport closes it as well.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed serial port {:?}", self.path);
        }
    }

    pub(crate) fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, Error> {
        self.port.as_mut().ok_or(Error::Closed)
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        trace!("serial write {} bytes: {:02x?}", buf.len(), buf);

        let port = self.port_mut()?;
        let written = port.write(buf)?;
        if written != buf.len() {
            return Err(Error::ShortWrite {
                written,
                expected: buf.len(),
            });
        }

        Ok(())
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let port = self.port_mut()?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        let mut tries = MAX_TIMEOUT_TRIES;

        while filled < len {
            match port.read(&mut buf[filled..]) {
                Ok(0) => tries -= 1,
                Ok(n) => {
                    filled += n;
                    tries = MAX_TIMEOUT_TRIES;
                }
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => tries -= 1,
                Err(e) => return Err(e.into()),
            }

            if tries == 0 {
                return Err(Error::Timeout);
            }
        }

        trace!("serial read {} bytes: {:02x?}", buf.len(), buf);

        Ok(buf)
    }

    fn change_baud(&mut self, baud_rate: u32) -> Result<(), Error> {
        if let Some(port) = self.port.as_mut() {
            // Anything still in flight belongs to the old rate.
            port.clear(ClearBuffer::All)?;
        }

        // The device node must be fully closed before it is reconfigured,
        // so the new termios settings apply from the first byte onwards.
        self.port = None;

        debug!("Reopening serial port {:?} at {} baud", self.path, baud_rate);
        let port = serialport::open_with_settings(
            self.path.as_os_str(),
            &port_settings(baud_rate),
        )
        .map_err(|source| Error::Open {
            path: self.path.display().to_string(),
            source,
        })?;

        self.port = Some(port);
        self.baud_rate = baud_rate;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use super::{Transport, INITIAL_BAUD};
    use crate::error::Error;
    use crate::frame::testutil::response_frame;
    use crate::protocol::ResponseId;

    /// Scripted stand-in for the serial link. Reads are served from a
    /// queue (an empty queue behaves like a silent target), and every
    /// write is recorded together with the line rate it was sent at.
    pub struct MockTransport {
        rx: VecDeque<u8>,
        pub writes: Vec<(u32, Vec<u8>)>,
        pub baud_rate: u32,
        pub baud_changes: Vec<u32>,
    }

    impl MockTransport {
        pub fn new() -> MockTransport {
            MockTransport {
                rx: VecDeque::new(),
                writes: Vec::new(),
                baud_rate: INITIAL_BAUD,
                baud_changes: Vec::new(),
            }
        }

        /// Scripts a single acknowledgement byte.
        pub fn push_ack(&mut self, ack: u8) {
            self.rx.push_back(ack);
        }

        /// Scripts a complete inbound frame carrying `body` behind `rsp`.
        pub fn push_response(&mut self, rsp: ResponseId, body: &[u8]) {
            self.rx.extend(response_frame(rsp, body));
        }

        /// Bytes the scripted target still has queued up.
        pub fn remaining(&self) -> usize {
            self.rx.len()
        }
    }

    impl Transport for MockTransport {
        fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
            self.writes.push((self.baud_rate, buf.to_vec()));
            Ok(())
        }

        fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, Error> {
            if self.rx.len() < len {
                return Err(Error::Timeout);
            }

            Ok(self.rx.drain(..len).collect())
        }

        fn change_baud(&mut self, baud_rate: u32) -> Result<(), Error> {
            self.baud_rate = baud_rate;
            self.baud_changes.push(baud_rate);
            Ok(())
        }
    }
}
