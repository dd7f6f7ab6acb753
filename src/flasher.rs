//! The end-to-end flashing workflow.
//!
//! Sequences the client's operations into one run: connect, raise the line
//! rate, identify, unlock, then either prove the flash already matches the
//! image or erase, program, verify, and finally hand control to the
//! application.

use std::time::Duration;

use log::{debug, info, warn};

use crate::client::{BslClient, DEFAULT_PASSWORD};
use crate::crc::crc32;
use crate::error::Error;
use crate::pause;
use crate::protocol::Baudrate;
use crate::transport::Transport;

/// The line rate a session is renegotiated to after connecting.
const SESSION_BAUD: Baudrate = Baudrate::B115200;

/// Host-side checksum of the image skips this prefix by default; the words
/// at the front of an image are not covered by the device's check.
pub const DEFAULT_VERIFY_OFFSET: u32 = 0x8;

/// Milestones of one flashing run.
///
/// Purely informational: the run is driven by the step results, none of
/// these flags gates a later step by itself.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct ProgrammerState {
    pub connected: bool,
    pub unlocked: bool,
    pub erased: bool,
    pub programmed: bool,
    pub verified: bool,
    pub started: bool,
}

/// How a successful [`Flasher::flash_image`] run ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashOutcome {
    /// The flash already held the image; nothing was written.
    UpToDate,
    /// The image was programmed and verified.
    Updated,
}

pub struct Flasher<T> {
    client: BslClient<T>,
    state: ProgrammerState,
    verify_offset: u32,
}

impl<T: Transport> Flasher<T> {
    pub fn new(client: BslClient<T>) -> Flasher<T> {
        Flasher {
            client,
            state: ProgrammerState::default(),
            verify_offset: DEFAULT_VERIFY_OFFSET,
        }
    }

    /// Overrides the prefix skipped by the host-side image checksum.
    pub fn with_verify_offset(mut self, offset: u32) -> Flasher<T> {
        self.verify_offset = offset;
        self
    }

    pub fn state(&self) -> ProgrammerState {
        self.state
    }

    pub fn client_mut(&mut self) -> &mut BslClient<T> {
        &mut self.client
    }

    pub fn into_client(self) -> BslClient<T> {
        self.client
    }

    /// Runs a full reflash of `image`.
    ///
    /// Unless `force` is set, the run first asks the device to checksum
    /// the range the image would occupy; when it already matches, erase
    /// and program are skipped and the application is started as-is.
    pub fn flash_image(&mut self, image: &[u8], force: bool) -> Result<FlashOutcome, Error> {
        self.connect()?;

        pause(Duration::from_millis(200));
        if let Err(err) = self.raise_baud() {
            warn!("Staying at the initial rate: {}", err);
        }

        pause(Duration::from_millis(100));
        self.identify()?;

        pause(Duration::from_millis(100));
        self.unlock()?;

        if !force {
            pause(Duration::from_millis(200));
            match self.verify_image(image) {
                Ok(()) => {
                    info!("Already up-to-date");
                    pause(Duration::from_millis(200));
                    self.start_application()?;
                    return Ok(FlashOutcome::UpToDate);
                }
                Err(err) => {
                    debug!("Flash contents differ ({}), updating", err);
                    self.state.verified = false;
                }
            }
        }

        pause(Duration::from_millis(100));
        self.mass_erase()?;

        pause(Duration::from_millis(100));
        self.program(image)?;

        pause(Duration::from_millis(200));
        self.verify_image(image)?;

        pause(Duration::from_millis(200));
        self.start_application()?;

        info!(
            "Status: programmed={} verified={} started={}",
            self.state.programmed, self.state.verified, self.state.started
        );

        Ok(FlashOutcome::Updated)
    }

    pub fn connect(&mut self) -> Result<(), Error> {
        info!(">> Connecting");
        self.client.connect()?;
        self.state.connected = true;

        Ok(())
    }

    /// Renegotiates the session rate. Callers may treat a failure as
    /// non-fatal and carry on at the rate the link already has.
    pub fn raise_baud(&mut self) -> Result<(), Error> {
        info!(">> Changing baudrate to {}", SESSION_BAUD.bps());
        self.client.change_baudrate(SESSION_BAUD)
    }

    pub fn identify(&mut self) -> Result<(), Error> {
        info!(">> Getting device info");
        let info = self.client.get_device_info()?;
        info!(
            "<< interpreter {:#06x}, build {:#06x}, app {:#010x}, buffer {} bytes",
            info.cmd_interpreter_version, info.build_id, info.app_version, info.bsl_max_buf
        );

        Ok(())
    }

    pub fn unlock(&mut self) -> Result<(), Error> {
        info!(">> Unlocking bootloader");
        self.client.unlock(&DEFAULT_PASSWORD)?;
        self.state.unlocked = true;

        Ok(())
    }

    pub fn mass_erase(&mut self) -> Result<(), Error> {
        info!(">> Mass erase before programming");
        self.client.mass_erase()?;
        self.state.erased = true;

        Ok(())
    }

    pub fn program(&mut self, image: &[u8]) -> Result<(), Error> {
        info!(">> Program data @0x00000000, size={} bytes", image.len());
        self.client.program_data(0, image)?;
        self.state.programmed = true;

        Ok(())
    }

    /// Compares the device's checksum of the programmed range against the
    /// host's checksum of the same slice of `image`.
    pub fn verify_image(&mut self, image: &[u8]) -> Result<(), Error> {
        let offset = self.verify_offset;
        let length = (image.len() as u32).saturating_sub(offset);
        info!(">> Standalone verification @{:#010x}, size={} bytes", offset, length);

        let device_crc = self.client.verify(offset, length)?;
        let image_crc = crc32(&image[offset as usize..]);
        debug!("<< device crc {:#010x}, image crc {:#010x}", device_crc, image_crc);

        if device_crc != image_crc {
            return Err(Error::CrcMismatch {
                device: device_crc,
                image: image_crc,
            });
        }

        info!(">> Verified programmed data");
        self.state.verified = true;

        Ok(())
    }

    pub fn start_application(&mut self) -> Result<(), Error> {
        info!(">> Starting application");
        self.client.start_application()?;
        self.state.started = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::protocol::{Ack, CoreMessage, ResponseId};
    use crate::transport::mock::MockTransport;

    fn test_image() -> Vec<u8> {
        (0..2048u32).map(|i| (i * 7) as u8).collect()
    }

    /// Scripts the steps every run starts with: connect, baud change,
    /// device info, unlock.
    fn script_preamble(mock: &mut MockTransport) {
        mock.push_ack(0x00); // Connection
        mock.push_ack(0x00); // ChangeBaudrate
        mock.push_ack(0x00); // GetDeviceInfo
        mock.push_response(
            ResponseId::GetDeviceInfo,
            &hex!("01 00 22 11 44 33 22 11 01 00 00 01 00 00 80 20 78 56 34 12 21 43 65 87"),
        );
        mock.push_ack(0x00); // UnlockBootloader
        mock.push_response(ResponseId::Message, &[0x00]);
    }

    fn push_verification(mock: &mut MockTransport, crc: u32) {
        mock.push_ack(0x00);
        mock.push_response(ResponseId::StandaloneVerification, &crc.to_le_bytes());
    }

    #[test]
    fn it_should_skip_programming_when_the_flash_already_matches() {
        let image = test_image();

        let mut mock = MockTransport::new();
        script_preamble(&mut mock);
        push_verification(&mut mock, crc32(&image[8..]));
        mock.push_ack(0x00); // StartApplication

        let mut flasher = Flasher::new(BslClient::new(mock));
        let outcome = flasher.flash_image(&image, false).unwrap();

        assert_eq!(outcome, FlashOutcome::UpToDate);

        let state = flasher.state();
        assert!(state.connected);
        assert!(state.unlocked);
        assert!(!state.erased);
        assert!(!state.programmed);
        assert!(state.verified);
        assert!(state.started);

        let mock = flasher.into_client().into_transport();
        assert_eq!(mock.remaining(), 0);
        // no ProgramData packet ever went out
        assert!(mock.writes.iter().all(|(_, packet)| packet[3] != 0x20));
    }

    #[test]
    fn it_should_erase_program_and_verify_when_forced() {
        let image = test_image();

        let mut mock = MockTransport::new();
        script_preamble(&mut mock);
        mock.push_ack(0x00); // MassErase
        mock.push_response(ResponseId::Message, &[0x00]);
        for _ in 0..16 {
            mock.push_ack(0x00); // ProgramData chunk
            mock.push_response(ResponseId::Message, &[0x00]);
        }
        push_verification(&mut mock, crc32(&image[8..]));
        mock.push_ack(0x00); // StartApplication

        let mut flasher = Flasher::new(BslClient::new(mock));
        let outcome = flasher.flash_image(&image, true).unwrap();

        assert_eq!(outcome, FlashOutcome::Updated);

        let state = flasher.state();
        assert!(state.erased);
        assert!(state.programmed);
        assert!(state.verified);
        assert!(state.started);

        let mock = flasher.into_client().into_transport();
        assert_eq!(mock.remaining(), 0);

        let program_packets = mock
            .writes
            .iter()
            .filter(|(_, packet)| packet[3] == 0x20)
            .count();
        assert_eq!(program_packets, 16);
    }

    #[test]
    fn it_should_reprogram_when_the_device_checksum_differs() {
        let image = test_image();

        let mut mock = MockTransport::new();
        script_preamble(&mut mock);
        push_verification(&mut mock, 0x11111111); // stale flash
        mock.push_ack(0x00); // MassErase
        mock.push_response(ResponseId::Message, &[0x00]);
        for _ in 0..16 {
            mock.push_ack(0x00);
            mock.push_response(ResponseId::Message, &[0x00]);
        }
        push_verification(&mut mock, crc32(&image[8..]));
        mock.push_ack(0x00); // StartApplication

        let mut flasher = Flasher::new(BslClient::new(mock));
        let outcome = flasher.flash_image(&image, false).unwrap();

        assert_eq!(outcome, FlashOutcome::Updated);
        assert!(flasher.state().programmed);
        assert!(flasher.state().verified);
    }

    #[test]
    fn it_should_carry_on_at_the_old_rate_when_the_baud_change_is_refused() {
        let image = test_image();

        let mut mock = MockTransport::new();
        mock.push_ack(0x00); // Connection
        mock.push_ack(0x56); // ChangeBaudrate: unknown baudrate
        mock.push_ack(0x00); // GetDeviceInfo
        mock.push_response(
            ResponseId::GetDeviceInfo,
            &hex!("01 00 22 11 44 33 22 11 01 00 00 01 00 00 80 20 78 56 34 12 21 43 65 87"),
        );
        mock.push_ack(0x00); // UnlockBootloader
        mock.push_response(ResponseId::Message, &[0x00]);
        push_verification(&mut mock, crc32(&image[8..]));
        mock.push_ack(0x00); // StartApplication

        let mut flasher = Flasher::new(BslClient::new(mock));
        let outcome = flasher.flash_image(&image, false).unwrap();

        assert_eq!(outcome, FlashOutcome::UpToDate);

        let mock = flasher.into_client().into_transport();
        assert!(mock.baud_changes.is_empty());
        assert!(mock.writes.iter().all(|(rate, _)| *rate == 9_600));
    }

    #[test]
    fn it_should_abort_on_a_failed_unlock() {
        let image = test_image();

        let mut mock = MockTransport::new();
        mock.push_ack(0x00); // Connection
        mock.push_ack(0x00); // ChangeBaudrate
        mock.push_ack(0x00); // GetDeviceInfo
        mock.push_response(
            ResponseId::GetDeviceInfo,
            &hex!("01 00 22 11 44 33 22 11 01 00 00 01 00 00 80 20 78 56 34 12 21 43 65 87"),
        );
        mock.push_ack(0x00); // UnlockBootloader
        mock.push_response(ResponseId::Message, &[0x02]);

        let mut flasher = Flasher::new(BslClient::new(mock));
        match flasher.flash_image(&image, false) {
            Err(Error::Device(CoreMessage::PasswordError)) => {}
            other => panic!("expected a password error, got {:?}", other),
        }

        let state = flasher.state();
        assert!(state.connected);
        assert!(!state.unlocked);
        assert!(!state.started);
    }

    #[test]
    fn it_should_abort_when_the_target_never_answers() {
        let mut flasher = Flasher::new(BslClient::new(MockTransport::new()));

        match flasher.flash_image(&test_image(), false) {
            Err(Error::Nack(Ack::Timeout)) => {}
            other => panic!("expected a timeout, got {:?}", other),
        }

        assert!(!flasher.state().connected);
    }
}
