use solodfu::{DfuSession, NusbTransport};

use crate::CliError;

pub(crate) fn show_option_bytes(
    session: &mut DfuSession<NusbTransport>,
) -> Result<(), CliError> {
    let bytes = session.read_option_bytes()?;
    let family = *session.family();
    println!(
        "Option bytes @ 0x{:08x} ({}):",
        family.option_bytes_addr, family.name
    );
    for (i, word) in bytes.chunks(4).enumerate() {
        let mut raw = [0xffu8; 4];
        raw[..word.len()].copy_from_slice(word);
        println!("  +{:02x}: 0x{:08x}", i * 4, u32::from_le_bytes(raw));
    }
    if let Some(first) = bytes.first_chunk::<4>() {
        let word = u32::from_le_bytes(*first);
        println!(
            "  boot from flash: {}",
            family.boot_from_flash(word) == word
        );
    }
    Ok(())
}

pub(crate) fn boot_from_flash(
    session: &mut DfuSession<NusbTransport>,
) -> Result<(), CliError> {
    println!("Checking option bytes...");
    if session.prepare_boot_mode_detach()? {
        println!("Option bytes rewritten to boot from flash");
    } else {
        println!("Option bytes already boot from flash");
    }
    Ok(())
}
