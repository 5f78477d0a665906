use solodfu::{
    Candidate, DfuSession, FindOptions, MemorySector, NusbBackend,
    NusbTransport, list, open,
};

use crate::CliError;

pub(crate) fn list_dfu_devices(options: &FindOptions) -> Result<(), CliError> {
    let candidates = list(&NusbBackend, &options.family)?;
    if candidates.is_empty() {
        println!("No DFU device found");
        return Ok(());
    }
    for candidate in &candidates {
        println!(
            "{} serial={}",
            candidate.describe(),
            candidate.serial_number().unwrap_or("-")
        );
        // a device held elsewhere still gets listed, just without layout
        match open(&NusbBackend, candidate, options) {
            Ok(session) => print_session(&session),
            Err(err) => println!("  (cannot open: {err})"),
        }
    }
    Ok(())
}

fn print_sector(prefix: &str, sector: &MemorySector) {
    let mut page_size = sector.page_size;
    let page_char = if page_size >= 1024 {
        page_size /= 1024;
        "K"
    } else {
        " "
    };
    println!(
        "{}0x{:08X} {:3} pages of {:4}{} bytes ({}{}{})",
        prefix,
        sector.start,
        sector.pages,
        page_size,
        page_char,
        if sector.readable() { "r" } else { "" },
        if sector.writable() { "w" } else { "" },
        if sector.erasable() { "e" } else { "" },
    );
}

fn print_session(session: &DfuSession<NusbTransport>) {
    let name = session.layout().map_or("(no layout)", |l| l.name.as_str());
    println!(
        "  {} (intf={}, alt={}, transfer size={}):",
        name,
        session.interface(),
        session.alt_setting(),
        session.transfer_size(),
    );
    if let Some(layout) = session.layout() {
        for sector in &layout.sectors {
            print_sector("    ", sector);
        }
    }
}
