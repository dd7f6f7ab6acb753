use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Flash a firmware image and start it
    Flash(FlashOpts),
    /// Pulse the RESET line, restarting whatever is in flash
    Reset(PinOpts),
    /// Force the target into its ROM bootloader
    #[structopt(name = "enter-bsl")]
    EnterBsl(PinOpts),
    /// Print the version string embedded in a firmware image
    #[structopt(name = "read-binary-version")]
    ReadBinaryVersion(BinaryOpts),
}

#[derive(StructOpt, Debug)]
pub struct FlashOpts {
    /// The serial device the bootloader is attached to (e.g. /dev/ttyACM0)
    pub serial_port: String,

    /// The firmware image to program
    pub firmware: PathBuf,

    /// Run the bootloader entry sequence over the control lines first
    #[structopt(long = "enter-bsl", default_value = "true", parse(try_from_str))]
    pub enter_bsl: bool,

    /// Reflash even when the device already holds this image
    #[structopt(long, default_value = "false", parse(try_from_str))]
    pub force: bool,
}

#[derive(StructOpt, Debug)]
pub struct PinOpts {
    /// The serial device whose control lines drive RESET and BSL entry
    #[structopt(short = "p", long = "port", default_value = "/dev/ttyACM0")]
    pub port: String,
}

#[derive(StructOpt, Debug)]
pub struct BinaryOpts {
    /// The firmware image to inspect
    pub firmware: PathBuf,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "mspm0-cli", about = "TI MSPM0 ROM bootloader flasher")]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,

    /// Verbosity level 0-3
    #[structopt(long, default_value = "0", global = true)]
    pub verbose: u8,
}
