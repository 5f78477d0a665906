//! Option-byte access through the DfuSe address pointer
//!
//! The option bytes live outside the flash window addressed by block
//! numbers, so the pointer is moved onto them and the region is always
//! transferred as the first data block.

use log::{debug, info, warn};

use crate::{DfuError, DfuSession, DfuState, FIRST_DATA_BLOCK, Transport};

impl<T: Transport> DfuSession<T> {
    /// Read the option-byte region.
    pub fn read_option_bytes(&mut self) -> Result<Vec<u8>, DfuError> {
        let family = *self.family();
        self.move_pointer(family.option_bytes_addr)?;
        self.read_block(FIRST_DATA_BLOCK, family.option_bytes_len)
    }

    /// Program the option-byte region.
    ///
    /// Stalls and disconnects while committing are logged and ignored, some
    /// bootloaders report them although the bytes were written.
    pub fn write_option_bytes(&mut self, bytes: &[u8]) -> Result<(), DfuError> {
        let family = *self.family();
        if bytes.len() != family.option_bytes_len as usize {
            return Err(DfuError::InvalidOptionBytes {
                len: bytes.len(),
                expected: family.option_bytes_len as usize,
            });
        }
        self.block_on_state(DfuState::DownloadBusy)?;
        self.move_pointer(family.option_bytes_addr)?;
        match self.write_block(FIRST_DATA_BLOCK, bytes) {
            Err(err) if err.is_benign_option_write_fault() => {
                warn!("ignoring error while writing option bytes: {}", err);
                Ok(())
            }
            res => res,
        }
    }

    /// Configure the device to boot its application from flash, ignoring
    /// the BOOT0 pin, so [DfuSession::detach] lands in the firmware.
    ///
    /// Returns whether the boot word had to be changed.
    pub fn prepare_boot_mode_detach(&mut self) -> Result<bool, DfuError> {
        // first access after power-up is unreliable, rewrite what is there
        let current = self.read_option_bytes()?;
        self.write_option_bytes(&current)?;

        let mut bytes = self.read_option_bytes()?;
        let Some(&[b0, b1, b2, b3]) = bytes.first_chunk::<4>() else {
            return Err(DfuError::InvalidOptionBytes {
                len: bytes.len(),
                expected: 4,
            });
        };
        let word = u32::from_le_bytes([b0, b1, b2, b3]);
        let patched = self.family().boot_from_flash(word);
        if patched == word {
            debug!("option bytes already boot from flash ({:#010x})", word);
            return Ok(false);
        }

        info!("rewriting option bytes {:#010x} -> {:#010x}", word, patched);
        bytes[..4].copy_from_slice(&patched.to_le_bytes());
        self.write_option_bytes(&bytes)?;
        Ok(true)
    }
}
