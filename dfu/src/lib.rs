//! DfuSe host driver for STM32-based security keys, based on [`nusb`]
//!
//! Drives the ST system bootloader through the USB Device Firmware Upgrade
//! protocol with the STM32 extensions (aka "DfuSe"): device discovery,
//! page erase, block-wise write and read, option-byte rewriting and the
//! final detach back into application mode.
//!
//! Useful references:
//! - DFU: [USB Device Firmware Upgrade Specification, Revision 1.1](https://www.usb.org/sites/default/files/DFU_1.1.pdf)
//! - DfuSe: [STMicroelectronics AN3156](https://www.st.com/resource/en/application_note/an3156-usb-dfu-protocol-used-in-the-stm32-bootloader-stmicroelectronics.pdf)
//!
//! # Example
//!
//! Locate the single attached bootloader and read the first flash block:
//! ```no_run
//! use solodfu::{DeviceFamily, FindOptions, NusbBackend, find};
//!
//! let options = FindOptions::new(DeviceFamily::STM32L4).attempts(3);
//! match find(&NusbBackend, &options) {
//!     Ok(mut session) => {
//!         let size = session.transfer_size();
//!         let data = session.read_memory(0x0800_0000, size)?;
//!         println!("read {} bytes", data.len());
//!     }
//!     Err(e) => println!("Error: {e}"),
//! }
//! # Ok::<(), solodfu::DfuError>(())
//! ```
//!
//! [`nusb`]: https://docs.rs/nusb

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000u64);
pub(crate) const DEFAULT_TRANSFER_SIZE: u16 = 1024 * 2;

mod address;
mod descriptor;
mod discovery;
mod error;
mod family;
mod memory;
mod option_bytes;
mod session;
mod status;
mod transport;

use std::time::Duration;

// Re-exports
pub use address::{
    FIRST_DATA_BLOCK, address_bytes, address_to_block, block_to_address,
};
pub use descriptor::{DFUSE_VERSION_NUMBER, DfuDescriptor};
pub use discovery::{
    Backend, Candidate, FindOptions, InterfaceBinding, NusbBackend, find,
    find_all, list, open,
};
pub use error::DfuError;
pub use family::DeviceFamily;
pub use memory::{MemoryLayout, MemorySector};
pub use session::DfuSession;
pub use status::{DfuState, DfuStatus};
pub use transport::{NusbTransport, Transport};
