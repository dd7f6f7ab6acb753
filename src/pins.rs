//! RESET and BSL-entry pin control.
//!
//! The ROM bootloader is entered by holding the BSL-entry pin while the
//! device comes out of reset. How the two pins are wired is up to the
//! board; on the usual debug adapters they ride the serial port's modem
//! control lines, which is what [`SerialTransport`] provides.
//!
//! [`SerialTransport`]: crate::transport::SerialTransport

use std::time::Duration;

use log::debug;
use serialport::SerialPort;

use crate::error::Error;
use crate::pause;
use crate::transport::SerialTransport;

/// How long RESET is held asserted during a pulse.
const RESET_PULSE: Duration = Duration::from_millis(10);

/// Settle time around BSL-entry pin changes.
const BSL_SETTLE: Duration = Duration::from_millis(10);

/// The two control pins that force the target into its bootloader.
///
/// `asserted` means electrically active: RESET holding the part in reset,
/// BSL-entry requesting bootloader mode. Implementations translate that to
/// whatever polarity their wiring uses.
pub trait BootPins {
    fn set_reset(&mut self, asserted: bool) -> Result<(), Error>;

    fn set_bsl(&mut self, asserted: bool) -> Result<(), Error>;

    /// Pulses RESET without touching the BSL-entry pin, restarting
    /// whatever is currently in flash.
    fn hard_reset(&mut self) -> Result<(), Error> {
        debug!("Pulsing reset");
        self.set_reset(true)?;
        pause(RESET_PULSE);
        self.set_reset(false)
    }

    /// Forces the target into the ROM bootloader: raise BSL-entry, pulse
    /// RESET while it is held, then release it once the part has latched
    /// the request.
    fn enter_bsl(&mut self) -> Result<(), Error> {
        debug!("Driving the BSL entry sequence");
        self.set_bsl(true)?;
        pause(BSL_SETTLE);
        self.hard_reset()?;
        pause(BSL_SETTLE);
        self.set_bsl(false)
    }
}

/// RESET on RTS, BSL-entry on DTR. Both lines are active-high here since
/// the usual adapter inverts them on the way to the part.
impl BootPins for SerialTransport {
    fn set_reset(&mut self, asserted: bool) -> Result<(), Error> {
        self.port_mut()?.write_request_to_send(asserted)?;

        Ok(())
    }

    fn set_bsl(&mut self, asserted: bool) -> Result<(), Error> {
        self.port_mut()?.write_data_terminal_ready(asserted)?;

        Ok(())
    }
}
