//! The wire vocabulary of the MSPM0 ROM bootloader: command and response
//! identifiers, the link-layer acknowledgement byte, the core-layer status
//! message, line-rate codes and the device information block.

use std::fmt;
use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};

/// Commands understood by the BSL core.
///
/// `FlashRangeErase`, `ProgramDataFast` and `FactoryReset` are listed for
/// completeness of the command space; the client does not issue them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, IntoPrimitive)]
pub enum CommandId {
    Connection = 0x12,
    MassErase = 0x15,
    GetDeviceInfo = 0x19,
    ProgramData = 0x20,
    UnlockBootloader = 0x21,
    FlashRangeErase = 0x23,
    ProgramDataFast = 0x24,
    StandaloneVerification = 0x26,
    MemoryRead = 0x29,
    FactoryReset = 0x30,
    StartApplication = 0x40,
    ChangeBaudrate = 0x52,
}

/// First payload byte of an inbound frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum ResponseId {
    MemoryRead = 0x30,
    GetDeviceInfo = 0x31,
    StandaloneVerification = 0x32,
    DetailedError = 0x3A,
    Message = 0x3B,
}

/// The single acknowledgement byte the target sends immediately after every
/// request, before any response frame.
///
/// `Timeout` and `Undefined` never appear on the wire; the host synthesises
/// them when the ack read times out or yields an unknown byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
pub enum Ack {
    Ok = 0x00,
    BadHeader = 0x51,
    BadChecksum = 0x52,
    PacketSizeZero = 0x53,
    PacketSizeTooBig = 0x54,
    UnknownError = 0x55,
    UnknownBaudrate = 0x56,
    Timeout = 0xA0,
    #[num_enum(default)]
    Undefined = 0xA1,
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Ack::Ok => "ACK",
            Ack::BadHeader => "incorrect header",
            Ack::BadChecksum => "wrong checksum",
            Ack::PacketSizeZero => "packet size zero",
            Ack::PacketSizeTooBig => "packet size too big",
            Ack::UnknownError => "BSL unknown error",
            Ack::UnknownBaudrate => "unknown baudrate",
            Ack::Timeout => "serial timeout",
            Ack::Undefined => "undefined",
        };

        f.write_str(text)
    }
}

/// Target-side status carried inside a `Message` frame, after the ack.
///
/// `Undefined` is a host sentinel for the case where framing succeeded but
/// the frame turned out not to be a `Message` (or carried an unknown code).
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
pub enum CoreMessage {
    Success = 0x00,
    Locked = 0x01,
    PasswordError = 0x02,
    MultiplePasswordError = 0x03,
    UnknownCommand = 0x04,
    InvalidMemoryRange = 0x05,
    InvalidCommand = 0x06,
    FactoryResetDisabled = 0x07,
    FactoryResetPasswordError = 0x08,
    ReadoutError = 0x09,
    InvalidAddressOrLength = 0x0A,
    InvalidVerificationLength = 0x0B,
    #[num_enum(default)]
    Undefined = 0xFF,
}

impl fmt::Display for CoreMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CoreMessage::Success => "success",
            CoreMessage::Locked => "bootloader is locked",
            CoreMessage::PasswordError => "incorrect password",
            CoreMessage::MultiplePasswordError => {
                "incorrect password sent three times, bootloader locked out"
            }
            CoreMessage::UnknownCommand => "unknown command",
            CoreMessage::InvalidMemoryRange => "invalid memory range",
            CoreMessage::InvalidCommand => "command is valid but cannot be processed right now",
            CoreMessage::FactoryResetDisabled => "factory reset disabled in BCR configuration",
            CoreMessage::FactoryResetPasswordError => "incorrect or missing factory reset password",
            CoreMessage::ReadoutError => "memory readout disabled in BCR configuration",
            CoreMessage::InvalidAddressOrLength => {
                "program address or length is not 8-byte aligned"
            }
            CoreMessage::InvalidVerificationLength => "verification range is shorter than 1 KiB",
            CoreMessage::Undefined => "undefined",
        };

        f.write_str(text)
    }
}

/// Line-rate codes accepted by the `ChangeBaudrate` command.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum Baudrate {
    B4800 = 0x01,
    B9600 = 0x02,
    B19200 = 0x03,
    B38400 = 0x04,
    B57600 = 0x05,
    B115200 = 0x06,
    B1000000 = 0x07,
    B2000000 = 0x08,
    B3000000 = 0x09,
}

impl Baudrate {
    /// The line rate in bits per second that this code selects.
    pub fn bps(self) -> u32 {
        match self {
            Baudrate::B4800 => 4_800,
            Baudrate::B9600 => 9_600,
            Baudrate::B19200 => 19_200,
            Baudrate::B38400 => 38_400,
            Baudrate::B57600 => 57_600,
            Baudrate::B115200 => 115_200,
            Baudrate::B1000000 => 1_000_000,
            Baudrate::B2000000 => 2_000_000,
            Baudrate::B3000000 => 3_000_000,
        }
    }
}

/// The device information block returned by `GetDeviceInfo`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct DeviceInfo {
    pub cmd_interpreter_version: u16,
    pub build_id: u16,
    pub app_version: u32,
    pub plugin_if_version: u16,
    /// Upper bound on the core payload the BSL can buffer in one packet.
    pub bsl_max_buf: u16,
    pub bsl_buf_start: u32,
    pub bcr_conf_id: u32,
    pub bsl_conf_id: u32,
}

impl DeviceInfo {
    /// Reads the packed little-endian info block. Trailing bytes a newer
    /// ROM may append behind the known fields are left unread.
    pub fn from_reader<R: Read + ReadBytesExt>(mut reader: R) -> io::Result<DeviceInfo> {
        let cmd_interpreter_version = reader.read_u16::<LittleEndian>()?;
        let build_id = reader.read_u16::<LittleEndian>()?;
        let app_version = reader.read_u32::<LittleEndian>()?;
        let plugin_if_version = reader.read_u16::<LittleEndian>()?;
        let bsl_max_buf = reader.read_u16::<LittleEndian>()?;
        let bsl_buf_start = reader.read_u32::<LittleEndian>()?;
        let bcr_conf_id = reader.read_u32::<LittleEndian>()?;
        let bsl_conf_id = reader.read_u32::<LittleEndian>()?;

        Ok(DeviceInfo {
            cmd_interpreter_version,
            build_id,
            app_version,
            plugin_if_version,
            bsl_max_buf,
            bsl_buf_start,
            bcr_conf_id,
            bsl_conf_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;
    use std::io::Cursor;

    use hex_literal::hex;
    use num_enum::FromPrimitive;

    use super::*;

    #[test]
    fn it_should_decode_a_device_info_block() {
        // interpreter version, build id, app version, plugin interface
        // version, max buffer size, buffer start, BCR and BSL conf ids
        let input =
            hex!("01 00 22 11 44 33 22 11 01 00 00 01 00 00 80 20 78 56 34 12 21 43 65 87");
        let info = DeviceInfo::from_reader(Cursor::new(&input)).unwrap();

        assert_eq!(info.cmd_interpreter_version, 0x0001);
        assert_eq!(info.build_id, 0x1122);
        assert_eq!(info.app_version, 0x11223344);
        assert_eq!(info.plugin_if_version, 0x0001);
        assert_eq!(info.bsl_max_buf, 256);
        assert_eq!(info.bsl_buf_start, 0x20800000);
        assert_eq!(info.bcr_conf_id, 0x12345678);
        assert_eq!(info.bsl_conf_id, 0x87654321);
    }

    #[test]
    fn it_should_map_known_ack_bytes() {
        assert_eq!(Ack::from_primitive(0x00), Ack::Ok);
        assert_eq!(Ack::from_primitive(0x51), Ack::BadHeader);
        assert_eq!(Ack::from_primitive(0x56), Ack::UnknownBaudrate);
    }

    #[test]
    fn it_should_map_unknown_ack_bytes_to_the_sentinel() {
        assert_eq!(Ack::from_primitive(0x42), Ack::Undefined);
    }

    #[test]
    fn it_should_map_unknown_core_messages_to_the_sentinel() {
        assert_eq!(CoreMessage::from_primitive(0x0B), CoreMessage::InvalidVerificationLength);
        assert_eq!(CoreMessage::from_primitive(0x0C), CoreMessage::Undefined);
    }

    #[test]
    fn it_should_map_baudrate_codes_to_line_rates() {
        assert_eq!(Baudrate::try_from(0x01).unwrap(), Baudrate::B4800);
        assert_eq!(Baudrate::B115200.bps(), 115_200);
        assert_eq!(Baudrate::B3000000.bps(), 3_000_000);
        assert!(Baudrate::try_from(0x0A).is_err());
    }
}
