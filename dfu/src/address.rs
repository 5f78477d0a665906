use crate::DfuError;

/// First block number carrying memory data. Blocks 0 and 1 are reserved
/// for DfuSe commands.
pub const FIRST_DATA_BLOCK: u16 = 2;

/// Translate an absolute flash address into a DfuSe block number.
///
/// `block = (address - flash_base) / transfer_size + 2`. The division
/// truncates, so callers must align `address` to `transfer_size` themselves
/// when they expect an exact mapping.
pub fn address_to_block(
    address: u32,
    transfer_size: u16,
    flash_base: u32,
) -> Result<u16, DfuError> {
    if transfer_size == 0 {
        return Err(DfuError::InvalidTransferSize);
    }
    let offset = address
        .checked_sub(flash_base)
        .ok_or(DfuError::AddressOutOfRange(address))?;
    let block = offset / transfer_size as u32 + FIRST_DATA_BLOCK as u32;
    u16::try_from(block).map_err(|_| DfuError::BlockOutOfRange(address))
}

/// Inverse of [address_to_block]: `(block - 2) * transfer_size + flash_base`.
pub fn block_to_address(
    block: u16,
    transfer_size: u16,
    flash_base: u32,
) -> Result<u32, DfuError> {
    if transfer_size == 0 {
        return Err(DfuError::InvalidTransferSize);
    }
    let index = block
        .checked_sub(FIRST_DATA_BLOCK)
        .ok_or(DfuError::BlockOutOfRange(block as u32))?;
    (index as u32)
        .checked_mul(transfer_size as u32)
        .and_then(|offset| offset.checked_add(flash_base))
        .ok_or(DfuError::BlockOutOfRange(block as u32))
}

/// Little-endian encoding of an address as carried by DfuSe commands.
pub fn address_bytes(address: u32) -> [u8; 4] {
    address.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLASH_BASE: u32 = 0x0800_0000;

    #[test]
    fn test_block_numbering() {
        assert_eq!(address_to_block(0x0800_4000, 2048, FLASH_BASE).unwrap(), 10);
        assert_eq!(address_to_block(FLASH_BASE, 2048, FLASH_BASE).unwrap(), 2);
        assert_eq!(block_to_address(10, 2048, FLASH_BASE).unwrap(), 0x0800_4000);
    }

    #[test]
    fn test_round_trip() {
        for transfer_size in [16u16, 256, 1024, 2048] {
            for index in [0u32, 1, 7, 63, 200] {
                let addr = FLASH_BASE + index * transfer_size as u32;
                let block =
                    address_to_block(addr, transfer_size, FLASH_BASE).unwrap();
                assert_eq!(
                    block_to_address(block, transfer_size, FLASH_BASE).unwrap(),
                    addr
                );
            }
        }
    }

    #[test]
    fn test_unaligned_truncates() {
        assert_eq!(address_to_block(0x0800_07ff, 2048, FLASH_BASE).unwrap(), 2);
        assert_eq!(address_to_block(0x0800_0800, 2048, FLASH_BASE).unwrap(), 3);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            address_to_block(0x0700_0000, 2048, FLASH_BASE),
            Err(DfuError::AddressOutOfRange(0x0700_0000))
        ));
        assert!(matches!(
            address_to_block(FLASH_BASE, 0, FLASH_BASE),
            Err(DfuError::InvalidTransferSize)
        ));
        assert!(matches!(
            address_to_block(0xffff_0000, 1, FLASH_BASE),
            Err(DfuError::BlockOutOfRange(_))
        ));
        assert!(matches!(
            block_to_address(1, 2048, FLASH_BASE),
            Err(DfuError::BlockOutOfRange(1))
        ));
    }

    #[test]
    fn test_address_bytes() {
        assert_eq!(address_bytes(0x1fff_7800), [0x00, 0x78, 0xff, 0x1f]);
    }
}
