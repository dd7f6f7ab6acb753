//! Typed wrappers for the BSL core commands.
//!
//! Every exchange follows the same two-phase shape: the host writes one
//! request frame, the target answers with a single acknowledgement byte,
//! and commands that produce a core-level response follow up with a full
//! inbound frame. The client reads the ack and, where one is defined, the
//! response, and turns both into a typed outcome.

use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use num_enum::FromPrimitive;

use crate::error::Error;
use crate::frame::{self, Frame, FrameError, CRC_LEN, HEADER_LEN, RSP_HEADER};
use crate::pause;
use crate::protocol::{Ack, Baudrate, CommandId, CoreMessage, DeviceInfo, ResponseId};
use crate::transport::Transport;

/// Host-side cap on the data carried by a single `ProgramData` packet.
///
/// The target advertises its real buffer limit in [`DeviceInfo::bsl_max_buf`];
/// 128 bytes stays comfortably below it on every MSPM0 variant.
pub const MAX_PAYLOAD: usize = 128;

/// Smallest range the ROM will checksum for standalone verification.
pub const MIN_VERIFY_LEN: u32 = 1024;

/// Factory default unlock password: an erased password region reads as all
/// ones.
pub const DEFAULT_PASSWORD: [u8; 32] = [0xFF; 32];

/// Flash writes need a moment to land between programming packets.
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(20);

/// A session with the ROM bootloader over a [`Transport`].
pub struct BslClient<T> {
    transport: T,
    device_info: Option<DeviceInfo>,
}

impl<T: Transport> BslClient<T> {
    pub fn new(transport: T) -> BslClient<T> {
        BslClient {
            transport,
            device_info: None,
        }
    }

    /// The info block cached by the last successful [`get_device_info`]
    /// call in this session.
    ///
    /// [`get_device_info`]: BslClient::get_device_info
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Primes the bootloader. A plain `ACK` is the only evidence of
    /// success; there is no response frame.
    pub fn connect(&mut self) -> Result<(), Error> {
        debug!("Sending connection command");
        let ack = self.exchange(CommandId::Connection, &[])?;

        check_ack(ack)
    }

    /// Requests the device information block and caches it for the rest of
    /// the session.
    pub fn get_device_info(&mut self) -> Result<DeviceInfo, Error> {
        debug!("Requesting device info");
        let ack = self.exchange(CommandId::GetDeviceInfo, &[])?;
        check_ack(ack)?;

        let response = self.read_response()?;
        if response.response() != Some(ResponseId::GetDeviceInfo) {
            return Err(unexpected_response(&response));
        }

        let info = DeviceInfo::from_reader(response.body())?;
        debug!(
            "BSL buffer: {} bytes at {:#010x}",
            info.bsl_max_buf, info.bsl_buf_start
        );
        self.device_info = Some(info);

        Ok(info)
    }

    /// Unlocks the bootloader with the given 32-byte password.
    ///
    /// A [`CoreMessage::PasswordError`] may be retried with a corrected
    /// password; [`CoreMessage::MultiplePasswordError`] means the ROM has
    /// tripped its lockout and further attempts are futile until a factory
    /// reset.
    pub fn unlock(&mut self, password: &[u8; 32]) -> Result<(), Error> {
        debug!("Unlocking bootloader");
        let ack = self.exchange(CommandId::UnlockBootloader, password)?;
        check_ack(ack)?;

        check_message(self.read_message()?)
    }

    /// Erases all of user flash.
    pub fn mass_erase(&mut self) -> Result<(), Error> {
        debug!("Sending mass erase");
        let ack = self.exchange(CommandId::MassErase, &[])?;
        check_ack(ack)?;

        check_message(self.read_message()?)
    }

    /// Programs `data` at `address`, split into [`MAX_PAYLOAD`]-sized
    /// packets that each carry their own absolute address.
    ///
    /// Both the address and the length must be multiples of 8; the ROM
    /// rejects anything else, and padding the final chunk is the caller's
    /// business. On failure the error names the offending block and its
    /// address.
    pub fn program_data(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        if address % 8 != 0 || data.len() % 8 != 0 {
            return Err(Error::Misaligned {
                address,
                length: data.len(),
            });
        }

        let mut offset = 0;
        let mut block: u32 = 0;

        while offset < data.len() {
            pause(INTER_CHUNK_DELAY);

            let chunk_size = MAX_PAYLOAD.min(data.len() - offset);
            let chunk_addr = address + offset as u32;
            debug!(
                "Programming block {}: {} bytes at {:#010x}",
                block, chunk_size, chunk_addr
            );

            let mut payload = Vec::with_capacity(4 + chunk_size);
            payload.extend_from_slice(&chunk_addr.to_le_bytes());
            payload.extend_from_slice(&data[offset..offset + chunk_size]);

            let ack = self.exchange(CommandId::ProgramData, &payload)?;

            // The status message is consumed even after a refused packet so
            // the line stays in sync for the caller's next attempt.
            let msg = match self.read_message() {
                Ok(msg) => msg,
                Err(Error::Timeout) => CoreMessage::Undefined,
                Err(source) => return Err(block_error(block, chunk_addr, source)),
            };

            if ack != Ack::Ok {
                return Err(block_error(block, chunk_addr, Error::Nack(ack)));
            }
            if msg != CoreMessage::Success {
                return Err(block_error(block, chunk_addr, Error::Device(msg)));
            }

            offset += chunk_size;
            block += 1;
        }

        Ok(())
    }

    /// Asks the ROM to checksum `length` bytes of memory at `address` and
    /// returns its CRC-32.
    ///
    /// The target may answer with either the verification frame or a
    /// `Message` (for example when the range is shorter than 1 KiB); the
    /// latter surfaces as [`Error::Device`].
    pub fn verify(&mut self, address: u32, length: u32) -> Result<u32, Error> {
        if length < MIN_VERIFY_LEN {
            return Err(Error::VerificationTooShort(length));
        }

        debug!("Verifying {} bytes at {:#010x}", length, address);
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&address.to_le_bytes());
        payload[4..].copy_from_slice(&length.to_le_bytes());

        let ack = self.exchange(CommandId::StandaloneVerification, &payload)?;
        check_ack(ack)?;

        let response = self.read_response()?;
        match response.response() {
            Some(ResponseId::StandaloneVerification) if response.body().len() >= 4 => {
                Ok(LittleEndian::read_u32(response.body()))
            }
            _ => Err(unexpected_response(&response)),
        }
    }

    /// Reads `length` bytes of target memory at `address`.
    ///
    /// Readout is only permitted when the BCR configuration allows it; a
    /// refusal comes back as [`Error::Device`] with the ROM's reason, and
    /// the refusing frame is drained off the line either way.
    pub fn memory_read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, Error> {
        debug!("Reading {} bytes at {:#010x}", length, address);
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&address.to_le_bytes());
        payload[4..].copy_from_slice(&length.to_le_bytes());

        let ack = self.exchange(CommandId::MemoryRead, &payload)?;
        check_ack(ack)?;

        let response = self.read_response()?;
        match response.response() {
            Some(ResponseId::MemoryRead) => Ok(response.body().to_vec()),
            _ => Err(unexpected_response(&response)),
        }
    }

    /// Negotiates a new line rate. On an `ACK` the local port is switched
    /// before any further byte is written, so both endpoints change in
    /// lock-step; on [`Ack::UnknownBaudrate`] the line stays as it was.
    pub fn change_baudrate(&mut self, rate: Baudrate) -> Result<(), Error> {
        debug!("Requesting {} baud", rate.bps());
        let ack = self.exchange(CommandId::ChangeBaudrate, &[rate.into()])?;
        check_ack(ack)?;

        self.transport.change_baud(rate.bps())
    }

    /// Hands control to the user application. The ack is the only signal;
    /// the BSL is gone afterwards.
    pub fn start_application(&mut self) -> Result<(), Error> {
        debug!("Starting application");
        let ack = self.exchange(CommandId::StartApplication, &[])?;

        check_ack(ack)
    }

    /// Writes one request and reads the acknowledgement byte that every
    /// command provokes.
    fn exchange(&mut self, cmd: CommandId, data: &[u8]) -> Result<Ack, Error> {
        let packet = frame::encode_request(cmd, data);
        self.transport.write_all(&packet)?;

        self.read_ack()
    }

    fn read_ack(&mut self) -> Result<Ack, Error> {
        let byte = match self.transport.read_exact(1) {
            Ok(bytes) => bytes[0],
            Err(Error::Timeout) => return Ok(Ack::Timeout),
            Err(e) => return Err(e),
        };

        let ack = Ack::from_primitive(byte);
        if ack != Ack::Ok {
            warn!("Bootloader answered {:#04x}: {}", byte, ack);
        }

        Ok(ack)
    }

    /// Reads one complete inbound frame: the header and length first, then
    /// the response identifier, then the rest of the core data sized by
    /// the declared length, plus the checksum trailer.
    fn read_response(&mut self) -> Result<Frame, Error> {
        let mut buf = self.transport.read_exact(HEADER_LEN)?;
        if buf[0] != RSP_HEADER {
            return Err(FrameError::BadHeader(buf[0]).into());
        }

        let length = usize::from(u16::from_le_bytes([buf[1], buf[2]]));
        if length > 0 {
            buf.extend(self.transport.read_exact(1)?);
        }
        buf.extend(self.transport.read_exact(length.saturating_sub(1) + CRC_LEN)?);

        Ok(Frame::parse(&buf)?)
    }

    /// Reads the frame that follows an ack and interprets it as a status
    /// message, falling back to the sentinel when it is anything else.
    fn read_message(&mut self) -> Result<CoreMessage, Error> {
        let response = self.read_response()?;
        if response.response() != Some(ResponseId::Message) {
            return Ok(CoreMessage::Undefined);
        }

        Ok(response
            .body()
            .first()
            .map(|&code| CoreMessage::from_primitive(code))
            .unwrap_or(CoreMessage::Undefined))
    }
}

fn check_ack(ack: Ack) -> Result<(), Error> {
    if ack == Ack::Ok {
        Ok(())
    } else {
        Err(Error::Nack(ack))
    }
}

fn check_message(msg: CoreMessage) -> Result<(), Error> {
    if msg == CoreMessage::Success {
        Ok(())
    } else {
        Err(Error::Device(msg))
    }
}

fn block_error(block: u32, address: u32, source: Error) -> Error {
    warn!("Programming failed at block {}, address {:#010x}", block, address);

    Error::BlockWrite {
        block,
        address,
        source: Box::new(source),
    }
}

/// Interprets a frame that arrived in place of the expected response,
/// surfacing the target's reason when it is a `Message`.
fn unexpected_response(frame: &Frame) -> Error {
    match (frame.response(), frame.body().first()) {
        (Some(ResponseId::Message), Some(&code)) => {
            Error::Device(CoreMessage::from_primitive(code))
        }
        _ => Error::Device(CoreMessage::Undefined),
    }
}
