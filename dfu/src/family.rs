/// Device-family constants
///
/// Everything that is specific to one MCU family and its ST bootloader:
/// USB identity, flash geometry, option-byte location and the bits that
/// select the boot source. Supporting another family means providing
/// another value set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceFamily {
    pub name: &'static str,
    pub vendor_id: u16,
    pub product_id: u16,
    pub flash_base: u32,
    pub page_size: u32,
    pub option_bytes_addr: u32,
    pub option_bytes_len: u16,
    /// Alternate setting exposing the option-byte region
    pub option_bytes_alt_setting: u8,
    /// Set in the first option word to boot from main flash
    pub boot_from_flash_mask: u32,
    /// Cleared in the first option word so the BOOT0 pin is ignored
    pub boot_pin_override_mask: u32,
    /// DfuSe "set address pointer" command byte
    pub cmd_set_address: u8,
    /// DfuSe "erase" command byte
    pub cmd_erase: u8,
}

impl DeviceFamily {
    /// STM32L432 as used by Solo keys
    pub const STM32L4: DeviceFamily = DeviceFamily {
        name: "STM32L4",
        vendor_id: 0x0483,
        product_id: 0xDF11,
        flash_base: 0x0800_0000,
        page_size: 2048,
        option_bytes_addr: 0x1FFF_7800,
        option_bytes_len: 16,
        option_bytes_alt_setting: 1,
        boot_from_flash_mask: 1 << 27,
        boot_pin_override_mask: 1 << 26,
        cmd_set_address: 0x21,
        cmd_erase: 0x41,
    };

    /// Apply the boot-from-flash configuration to the first option word.
    pub fn boot_from_flash(&self, word: u32) -> u32 {
        (word | self.boot_from_flash_mask) & !self.boot_pin_override_mask
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl Default for DeviceFamily {
    fn default() -> Self {
        Self::STM32L4
    }
}
