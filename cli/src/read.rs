use std::{
    cmp,
    io::{self, Write},
};

use solodfu::{DfuSession, NusbTransport};

use crate::CliError;

pub(crate) fn upload(
    session: &mut DfuSession<NusbTransport>,
    start_address: Option<u32>,
    length: Option<u32>,
) -> Result<Vec<u8>, CliError> {
    let layout_end = session.layout().map(|l| l.end());
    let start_address = start_address.unwrap_or(session.family().flash_base);
    let total = match (length, layout_end) {
        (Some(len), _) => len,
        (None, Some(end)) if end > start_address => end - start_address,
        _ => {
            return Err(CliError::OutOfRange {
                start: start_address,
                len: 0,
            });
        }
    };
    let transfer_size = session.transfer_size() as u32;

    println!("Reading {total} bytes from {start_address:#010x}...");
    let mut data: Vec<u8> = Vec::with_capacity(total as usize);
    let mut addr = start_address;
    while (data.len() as u32) < total {
        let chunk = cmp::min(total - data.len() as u32, transfer_size);
        data.extend(session.read_memory(addr, chunk as u16)?);
        addr += chunk;

        let done = data.len() as u32;
        let percentage = (100 * done) / total;
        let filled = ((60 * done) / total) as usize;
        print!(
            "\r  Reading {:3}% [{}]",
            percentage,
            "#".repeat(filled) + &" ".repeat(60 - filled)
        );
        let _ = io::stdout().flush();
    }
    println!();

    Ok(data)
}
