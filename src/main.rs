use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use updiprog::constants::segments;
use updiprog::transport::{Baudrate, SerialTransport};
use updiprog::{ChipDB, Flashing, Segment};

#[derive(Parser)]
#[command(
    name = "updiprog",
    version,
    about = "UPDI programmer for tinyAVR 0/1-series over a serial adapter"
)]
struct Cli {
    /// Serial port of the UPDI adapter, the first port found if omitted
    #[arg(short = 'l', long, global = true)]
    port: Option<String>,
    /// Expected device name, e.g. ATtiny202
    #[arg(short, long, global = true)]
    device: Option<String>,
    #[arg(short, long, value_enum, default_value_t = Baudrate::default(), global = true)]
    baudrate: Baudrate,
    /// Turn debug logs on
    #[arg(long, global = true)]
    debug: bool,
    /// Turn trace logs on
    #[arg(long, global = true)]
    trace: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports and supported devices
    List {},
    /// Get info about current connected chip
    Info {},
    /// Reset the target connected
    Reset {},
    /// Erase flash and EEPROM, unlocking a locked chip
    Erase {},
    /// Program flash, EEPROM and fuses from a firmware file
    Flash {
        /// Intel HEX or raw binary
        path: String,
        /// Read back and compare flash and EEPROM
        #[arg(short, long)]
        verify: bool,
    },
    /// Verify flash and EEPROM content
    Verify { path: String },
    /// Read all fuses
    ReadFuses {},
    /// Write fuses, each given as hex ADDR:VALUE
    WriteFuse {
        #[arg(required = true)]
        fuses: Vec<String>,
    },
    /// Hex dump of flash or EEPROM
    Dump {
        #[arg(value_enum)]
        memory: Memory,
        /// Number of pages, all if omitted
        #[arg(short, long)]
        pages: Option<usize>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Memory {
    Flash,
    Eeprom,
}

fn progress_bar(segment: &Segment) -> Result<ProgressBar> {
    let bar = ProgressBar::new(segment.page_count as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg:>6} [{bar:40.cyan/blue}] {pos:>3}/{len:3} pages")?
            .progress_chars("#>-"),
    );
    bar.set_message(segment.name);
    Ok(bar)
}

fn write_segment(
    flashing: &mut Flashing<SerialTransport>,
    segment: Segment,
    image: &[Option<u8>],
    verify: bool,
) -> Result<()> {
    let bar = progress_bar(&segment)?;
    flashing.write_segment(segment, image, |page, _| bar.set_position(page as u64 + 1))?;
    bar.finish();
    if verify {
        flashing.verify_segment(segment, image)?;
        log::info!("{} memory OK", segment.name);
    }
    Ok(())
}

fn parse_fuse(s: &str) -> Result<(u8, u8)> {
    let Some((addr, value)) = s.split_once(':') else {
        anyhow::bail!("Format Error: {:?}, expected ADDR:VALUE", s);
    };
    Ok((
        u8::from_str_radix(addr, 16)?,
        u8::from_str_radix(value, 16)?,
    ))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.trace {
        simplelog::LevelFilter::Trace
    } else if cli.debug {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    if let Commands::List {} = cli.command {
        for port in SerialTransport::scan_ports()? {
            println!("{}", port);
        }
        log::info!("Supported devices: {}", ChipDB::load()?.names().join(", "));
        return Ok(());
    }

    let transport = match &cli.port {
        Some(port) => SerialTransport::open(port, cli.baudrate)?,
        None => SerialTransport::open_nth(0, cli.baudrate)?,
    };
    let mut flashing = Flashing::new(transport, cli.device.as_deref())?;

    match cli.command {
        Commands::List {} => unreachable!("handled before connecting"),
        Commands::Info {} => {
            flashing.dump_info()?;
        }
        Commands::Reset {} => {
            flashing.reset()?;
        }
        Commands::Erase {} => {
            flashing.chip_erase(true)?;
        }
        Commands::Flash { path, verify } => {
            let image = updiprog::format::read_firmware_from_file(path)?;
            let device = flashing.device().clone();
            if let Some(bin) = image.segment(segments::FLASH) {
                log::info!(
                    "Programming flash memory ({} bytes)",
                    image.programmed(segments::FLASH)
                );
                write_segment(&mut flashing, device.flash, bin, verify)?;
            }
            if let Some(bin) = image.segment(segments::EEPROM) {
                log::info!(
                    "Writing EEPROM memory ({} bytes)",
                    image.programmed(segments::EEPROM)
                );
                write_segment(&mut flashing, device.eeprom, bin, verify)?;
            }
            if let Some(bin) = image.segment(segments::FUSES) {
                flashing.write_fuses(bin)?;
            }
        }
        Commands::Verify { path } => {
            let image = updiprog::format::read_firmware_from_file(path)?;
            let device = flashing.device().clone();
            if let Some(bin) = image.segment(segments::FLASH) {
                flashing.verify_segment(device.flash, bin)?;
            }
            if let Some(bin) = image.segment(segments::EEPROM) {
                flashing.verify_segment(device.eeprom, bin)?;
            }
            log::info!("Verified!");
        }
        Commands::ReadFuses {} => {
            let fuses = flashing.read_fuses()?;
            for fuse in &flashing.device().fuses {
                let value = fuses[fuse.offset as usize];
                println!(
                    "{:<8}({:02X}): {:04b} {:04b} ({:02X})",
                    fuse.name,
                    fuse.offset,
                    value >> 4,
                    value & 0x0F,
                    value
                );
            }
        }
        Commands::WriteFuse { fuses } => {
            for fuse in &fuses {
                let (addr, value) = parse_fuse(fuse)?;
                flashing.write_fuse(addr, value)?;
            }
        }
        Commands::Dump { memory, pages } => {
            let segment = match memory {
                Memory::Flash => flashing.device().flash,
                Memory::Eeprom => flashing.device().eeprom,
            };
            let page_count = match pages {
                Some(n) if n > 0 && n <= segment.page_count => n,
                _ => segment.page_count,
            };
            let read_size = page_count * segment.page_size;
            log::info!("Reading {} bytes of {} memory", read_size, segment.name);
            let data = flashing.read_segment(segment, 0, Some(read_size))?;
            let mut out = Vec::new();
            hxdmp::hexdump(&data, &mut out)?;
            println!("{}", String::from_utf8_lossy(&out));
        }
    }

    flashing.close()?;
    Ok(())
}
