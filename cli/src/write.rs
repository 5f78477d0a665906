use std::io::{self, Write};

use solodfu::{DeviceFamily, DfuError, DfuSession, NusbTransport};

use crate::CliError;

pub(crate) fn download(
    data: &[u8],
    session: &mut DfuSession<NusbTransport>,
    start_address: Option<u32>,
    mass_erase: bool,
) -> Result<(), CliError> {
    let start_address = start_address.unwrap_or(session.family().flash_base);
    let len = data.len() as u32;

    // nothing is erased unless every block can be written
    check_start(session.family(), session.transfer_size(), start_address)?;
    let pages = erase_pages(session, start_address, len)?;
    if mass_erase {
        println!("Mass erasing...");
        session.mass_erase()?;
    } else {
        erase_listed(session, pages)?;
    }

    let transfer_size = session.transfer_size() as usize;
    let mut addr = start_address;
    let mut bytes_downloaded: usize = 0;

    for chunk in data.chunks(transfer_size) {
        // keep every block transfer-sized so block numbers stay aligned
        let mut page = chunk.to_vec();
        page.resize(transfer_size, 0xff);
        session.write_page(addr, &page)?;
        addr += chunk.len() as u32;
        bytes_downloaded += chunk.len();

        let percentage = (100 * bytes_downloaded) / data.len();
        let filled = (60 * bytes_downloaded) / data.len();
        print!(
            "\r  Flashing {:3}% [{}]",
            percentage,
            "#".repeat(filled) + &" ".repeat(60 - filled)
        );
        let _ = io::stdout().flush();
    }
    println!();

    Ok(())
}

pub(crate) fn erase_range(
    session: &DfuSession<NusbTransport>,
    start_address: u32,
    len: u32,
) -> Result<(), CliError> {
    let pages = erase_pages(session, start_address, len)?;
    erase_listed(session, pages)
}

fn erase_listed(
    session: &DfuSession<NusbTransport>,
    pages: Vec<u32>,
) -> Result<(), CliError> {
    let count = pages.len();

    for (page, page_addr) in pages.into_iter().enumerate() {
        print!(
            "\r  Erasing page {:3} of {:3} @ 0x{:08x}",
            page + 1,
            count,
            page_addr
        );
        let _ = io::stdout().flush();
        if let Err(err) = session.erase(page_addr) {
            println!(" ❌");
            return Err(err.into());
        }
    }
    println!();
    Ok(())
}

fn erase_pages(
    session: &DfuSession<NusbTransport>,
    start_address: u32,
    len: u32,
) -> Result<Vec<u32>, CliError> {
    let out_of_range = CliError::OutOfRange {
        start: start_address,
        len,
    };
    let end = start_address.checked_add(len).ok_or(out_of_range)?;

    if let Some(layout) = session.layout() {
        if start_address < layout.start() || end > layout.end() {
            return Err(CliError::OutOfRange {
                start: start_address,
                len,
            });
        }
        return Ok(layout.erase_pages(start_address, len));
    }

    let family = session.family();
    let first = start_address
        .checked_sub(family.flash_base)
        .ok_or(DfuError::AddressOutOfRange(start_address))?
        / family.page_size;
    let last = (end - family.flash_base).div_ceil(family.page_size);
    Ok((first..last)
        .map(|page| family.flash_base + page * family.page_size)
        .collect())
}

/// Writes start on a page boundary that is also a block boundary.
fn check_start(
    family: &DeviceFamily,
    transfer_size: u16,
    start_address: u32,
) -> Result<(), DfuError> {
    let offset = start_address
        .checked_sub(family.flash_base)
        .ok_or(DfuError::AddressOutOfRange(start_address))?;
    let align = family.page_size.max(transfer_size as u32);
    if offset % align != 0 {
        return Err(DfuError::UnalignedAddress(start_address));
    }
    Ok(())
}
