use std::{fs, path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use parse_size::parse_size;

use error::CliError;
use list::*;
use options::*;
use read::*;
use solodfu::{
    DeviceFamily, DfuSession, FindOptions, NusbBackend, NusbTransport, find,
};
use write::*;

mod error;
mod list;
mod options;
mod read;
mod write;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    device: DeviceArgs,
}

#[derive(Args, Default)]
struct DeviceArgs {
    /// bootloader serial number (ex: "2050335E3548")
    #[clap(short, long, global = true)]
    serial: Option<String>,
    /// alternate setting (default: 0, option bytes use their own)
    #[clap(short, long, global = true)]
    alt: Option<u8>,
    /// discovery attempts
    #[clap(long, global = true, default_value_t = 8)]
    attempts: u32,
    /// vendor ID override (ex: "0483")
    #[clap(long, global = true, value_parser=hex_u16)]
    vendor: Option<u16>,
    /// product ID override (ex: "df11")
    #[clap(long, global = true, value_parser=hex_u16)]
    product: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// list DFU devices
    List,
    /// read from device
    Read {
        /// file to write (raw binary)
        file: PathBuf,
        /// start address (ex: 0x08000000)
        #[clap(long, value_parser=maybe_hex::<u32>)]
        start_address: Option<u32>,
        /// length (ex: 64KiB, 256KiB)
        #[clap(short, long, value_parser=parse_length)]
        length: Option<u32>,
    },
    /// write to device
    Write {
        /// file to flash (raw binary)
        file: PathBuf,
        /// start address (ex: 0x08000000)
        #[clap(long, value_parser=maybe_hex::<u32>)]
        start_address: Option<u32>,
        /// erase the whole flash instead of the written pages
        #[clap(long)]
        mass_erase: bool,
        /// boot from flash and leave DFU once written
        #[clap(long)]
        detach: bool,
    },
    /// erase flash pages
    Erase {
        /// start address (ex: 0x08000000)
        #[clap(long, value_parser=maybe_hex::<u32>, requires = "length")]
        start_address: Option<u32>,
        /// length (ex: 2KiB)
        #[clap(short, long, value_parser=parse_length)]
        length: Option<u32>,
        /// erase the whole flash
        #[clap(long, conflicts_with_all = ["start_address", "length"])]
        mass: bool,
    },
    /// show option bytes
    OptionBytes,
    /// make the device boot from flash instead of the BOOT0 pin
    BootFromFlash,
    /// leave DFU mode
    Detach,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::List
    }
}

fn hex_u16(s: &str) -> Result<u16, String> {
    <u16>::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| format!("{e}"))
}

fn parse_length(s: &str) -> Result<u32, String> {
    let len = parse_size(s).map_err(|e| format!("{e}"))?;
    len.try_into().map_err(|e| format!("{e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::init();

    let device = &cli.device;
    if let Err(err) = match &cli.command.unwrap_or_default() {
        Commands::List => list_dfu_devices(&find_options(device, 0)),
        Commands::Read {
            file,
            start_address,
            length,
        } => read_file(device, file, start_address, length),
        Commands::Write {
            file,
            start_address,
            mass_erase,
            detach,
        } => write_file(device, file, start_address, *mass_erase, *detach),
        Commands::Erase {
            start_address,
            length,
            mass,
        } => erase_cmd(device, start_address, length, *mass),
        Commands::OptionBytes => option_bytes_cmd(device),
        Commands::BootFromFlash => boot_cmd(device),
        Commands::Detach => detach_cmd(device),
    } {
        eprintln!("Error: {err}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn find_options(args: &DeviceArgs, default_alt: u8) -> FindOptions {
    let mut family = DeviceFamily::STM32L4;
    if let Some(vid) = args.vendor {
        family.vendor_id = vid;
    }
    if let Some(pid) = args.product {
        family.product_id = pid;
    }
    let mut options = FindOptions::new(family)
        .attempts(args.attempts)
        .alt_setting(args.alt.unwrap_or(default_alt));
    if let Some(serial) = &args.serial {
        options = options.serial(serial);
    }
    options
}

fn get_session(
    args: &DeviceArgs,
    default_alt: u8,
) -> Result<DfuSession<NusbTransport>, CliError> {
    Ok(find(&NusbBackend, &find_options(args, default_alt))?)
}

fn option_alt() -> u8 {
    DeviceFamily::STM32L4.option_bytes_alt_setting
}

fn read_file(
    args: &DeviceArgs,
    file: &PathBuf,
    start_address: &Option<u32>,
    length: &Option<u32>,
) -> Result<(), CliError> {
    let mut session = get_session(args, 0)?;
    let data = upload(&mut session, *start_address, *length)?;
    fs::write(file, data)?;
    Ok(())
}

fn write_file(
    args: &DeviceArgs,
    file: &PathBuf,
    start_address: &Option<u32>,
    mass_erase: bool,
    detach: bool,
) -> Result<(), CliError> {
    let data = fs::read(file)?;
    let mut session = get_session(args, 0)?;
    download(&data, &mut session, *start_address, mass_erase)?;
    if detach {
        session.close();
        let mut session = get_session(args, option_alt())?;
        boot_from_flash(&mut session)?;
        leave(session)?;
    }
    Ok(())
}

fn erase_cmd(
    args: &DeviceArgs,
    start_address: &Option<u32>,
    length: &Option<u32>,
    mass: bool,
) -> Result<(), CliError> {
    let session = get_session(args, 0)?;
    if mass {
        println!("Mass erasing...");
        session.mass_erase()?;
        return Ok(());
    }
    let start = start_address.unwrap_or(session.family().flash_base);
    erase_range(&session, start, length.unwrap_or(session.family().page_size))
}

fn option_bytes_cmd(args: &DeviceArgs) -> Result<(), CliError> {
    let mut session = get_session(args, option_alt())?;
    show_option_bytes(&mut session)
}

fn boot_cmd(args: &DeviceArgs) -> Result<(), CliError> {
    let mut session = get_session(args, option_alt())?;
    boot_from_flash(&mut session)
}

fn detach_cmd(args: &DeviceArgs) -> Result<(), CliError> {
    leave(get_session(args, 0)?)
}

fn leave(session: DfuSession<NusbTransport>) -> Result<(), CliError> {
    println!("Leaving DFU...");
    let status = session.detach()?;
    log::debug!("status after detach: {:?}", status);
    Ok(())
}
