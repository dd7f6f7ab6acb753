use std::io;

use thiserror::Error;

use crate::frame::FrameError;
use crate::protocol::{Ack, CoreMessage};

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not open serial port {path}: {source}")]
    Open {
        path: String,
        source: serialport::Error,
    },

    #[error("the serial port is closed")]
    Closed,

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("serial read timed out")]
    Timeout,

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// The target refused the packet at the link layer.
    #[error("bootloader did not acknowledge: {0}")]
    Nack(Ack),

    /// The target acknowledged the packet but reported a core-level failure.
    #[error("bootloader reported: {0}")]
    Device(CoreMessage),

    #[error("program address {address:#010x} and length {length} must be multiples of 8")]
    Misaligned { address: u32, length: usize },

    #[error("verification range of {0} bytes is below the 1 KiB minimum")]
    VerificationTooShort(u32),

    #[error("flash contents differ from the image (device crc {device:#010x}, image crc {image:#010x})")]
    CrcMismatch { device: u32, image: u32 },

    #[error("programming failed at block {block}, address {address:#010x}: {source}")]
    BlockWrite {
        block: u32,
        address: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("image is {len} bytes, the version string field ends at {needed}")]
    ShortImage { len: usize, needed: usize },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// An I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
