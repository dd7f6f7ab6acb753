//! Host-side client for the UART bootloader (BSL) in the ROM of TI MSPM0
//! microcontrollers: packet framing, the command set, and a flashing
//! workflow that erases, programs, verifies and starts a firmware image.

use std::time::Duration;

pub mod client;
pub mod crc;
mod error;
pub mod flasher;
pub mod frame;
pub mod image;
pub mod pins;
pub mod protocol;
pub mod transport;

pub use error::Error;

/// Protocol-mandated settle time. Skipped under test, where the scripted
/// transports answer instantly and the delays would only stall the suite.
pub(crate) fn pause(duration: Duration) {
    if !cfg!(test) {
        std::thread::sleep(duration);
    }
}
