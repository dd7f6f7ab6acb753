use anyhow::Context;
use log::LevelFilter;
use structopt::StructOpt;

use mspm0::client::BslClient;
use mspm0::flasher::{FlashOutcome, Flasher};
use mspm0::image::Firmware;
use mspm0::pins::BootPins;
use mspm0::transport::SerialTransport;

mod cli;

use cli::{BinaryOpts, Command, FlashOpts, Opts, PinOpts};

fn main() -> Result<(), anyhow::Error> {
    let opts = Opts::from_args();

    let filter = match opts.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    pretty_env_logger::formatted_builder()
        .filter_level(filter)
        .init();

    match opts.command {
        Command::Flash(flash_opts) => flash(flash_opts),
        Command::Reset(pin_opts) => reset(pin_opts),
        Command::EnterBsl(pin_opts) => enter_bsl(pin_opts),
        Command::ReadBinaryVersion(binary_opts) => read_binary_version(binary_opts),
    }
}

fn flash(opts: FlashOpts) -> Result<(), anyhow::Error> {
    let firmware = Firmware::from_file(&opts.firmware).with_context(|| {
        format!("Failed to read firmware image '{}'", opts.firmware.display())
    })?;

    println!(
        "Using serial {} to flash {}",
        opts.serial_port,
        opts.firmware.display()
    );
    match firmware.version() {
        Ok(version) => println!("Firmware version: {}", version),
        Err(err) => println!("No embedded firmware version ({})", err),
    }

    let mut transport = SerialTransport::open(&opts.serial_port)?;

    if opts.enter_bsl {
        println!("Entering BSL mode");
        transport
            .enter_bsl()
            .context("Could not enter BSL mode")?;
    }

    let mut flasher = Flasher::new(BslClient::new(transport));
    let outcome = flasher
        .flash_image(firmware.as_bytes(), opts.force)
        .context("Flashing failed")?;

    match outcome {
        FlashOutcome::UpToDate => println!("Already up-to-date, started the application"),
        FlashOutcome::Updated => println!(
            "Flashed {} bytes, verified and started the application",
            firmware.len()
        ),
    }

    Ok(())
}

fn reset(opts: PinOpts) -> Result<(), anyhow::Error> {
    let mut transport = SerialTransport::open(&opts.port)?;

    println!("Resetting via the control lines");
    transport.hard_reset().context("Could not reset the target")?;

    Ok(())
}

fn enter_bsl(opts: PinOpts) -> Result<(), anyhow::Error> {
    let mut transport = SerialTransport::open(&opts.port)?;

    println!("Entering BSL mode");
    transport.enter_bsl().context("Could not enter BSL mode")?;

    Ok(())
}

fn read_binary_version(opts: BinaryOpts) -> Result<(), anyhow::Error> {
    let firmware = Firmware::from_file(&opts.firmware).with_context(|| {
        format!("Failed to read firmware image '{}'", opts.firmware.display())
    })?;

    println!("Binary: {}", opts.firmware.display());
    println!("Firmware version: {}", firmware.version()?);

    Ok(())
}
