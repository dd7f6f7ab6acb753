//! Packet framing for the BSL UART interface.
//!
//! Every unit on the wire is `header | len_lo | len_hi | core data | crc32`,
//! where the core data starts with a command or response identifier and the
//! trailing checksum covers the core data only.

use std::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::crc::crc32;
use crate::protocol::{CommandId, ResponseId};

/// Header byte of a host-to-target packet.
pub const CMD_HEADER: u8 = 0x80;
/// Header byte of a target-to-host packet.
pub const RSP_HEADER: u8 = 0x08;

/// Bytes in front of the core data: the header and the 16-bit length.
pub const HEADER_LEN: usize = 3;
/// Bytes of checksum behind the core data.
pub const CRC_LEN: usize = 4;

#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum FrameError {
    #[error("incorrect frame header {0:#04x}")]
    BadHeader(u8),

    #[error("frame declares {declared} core bytes but {available} are present")]
    BadLength { declared: usize, available: usize },

    #[error("frame checksum is {expected:#010x}, computed {computed:#010x}")]
    BadCrc { expected: u32, computed: u32 },
}

/// Serialises a request packet: `[0x80, len, cmd, data..., crc32]` with the
/// length and checksum both covering the command byte plus `data`.
pub fn encode_request(cmd: CommandId, data: &[u8]) -> Vec<u8> {
    let core_len = 1 + data.len();
    debug_assert!(core_len <= usize::from(u16::MAX));

    let mut buf = Vec::with_capacity(HEADER_LEN + core_len + CRC_LEN);
    buf.push(CMD_HEADER);
    buf.extend_from_slice(&(core_len as u16).to_le_bytes());
    buf.push(cmd.into());
    buf.extend_from_slice(data);

    let crc = crc32(&buf[HEADER_LEN..]);
    buf.extend_from_slice(&crc.to_le_bytes());

    buf
}

/// A validated inbound frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    length: u16,
    payload: Vec<u8>,
    crc: u32,
}

impl Frame {
    /// Parses and validates one complete frame from `buf`.
    pub fn parse(buf: &[u8]) -> Result<Frame, FrameError> {
        let header = *buf.first().ok_or(FrameError::BadLength {
            declared: 0,
            available: 0,
        })?;
        if header != RSP_HEADER {
            return Err(FrameError::BadHeader(header));
        }

        if buf.len() < HEADER_LEN + CRC_LEN {
            return Err(FrameError::BadLength {
                declared: 0,
                available: buf.len(),
            });
        }

        let length = LittleEndian::read_u16(&buf[1..3]);
        let available = buf.len() - HEADER_LEN - CRC_LEN;
        if usize::from(length) != available {
            return Err(FrameError::BadLength {
                declared: usize::from(length),
                available,
            });
        }

        let payload = buf[HEADER_LEN..HEADER_LEN + available].to_vec();
        let crc = LittleEndian::read_u32(&buf[HEADER_LEN + available..]);
        let computed = crc32(&payload);
        if crc != computed {
            return Err(FrameError::BadCrc {
                expected: crc,
                computed,
            });
        }

        Ok(Frame {
            length,
            payload,
            crc,
        })
    }

    /// Declared length of the core data, response identifier included.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// The validated checksum from the trailer.
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// The response identifier, when the first payload byte is a known one.
    pub fn response(&self) -> Option<ResponseId> {
        self.payload
            .first()
            .and_then(|&code| ResponseId::try_from(code).ok())
    }

    /// Core data behind the response identifier.
    pub fn body(&self) -> &[u8] {
        self.payload.get(1..).unwrap_or(&[])
    }
}
