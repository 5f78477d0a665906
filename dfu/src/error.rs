use std::time::Duration;

use nusb::transfer::TransferError;

use crate::DfuState;

#[derive(Debug)]
pub enum DfuError {
    Usb(nusb::Error),
    Transfer(TransferError),
    /// No matching device after all discovery attempts
    NotFound { attempts: u32 },
    /// Several devices matched and none can be picked safely
    NonUniqueDevice { count: usize },
    NoAltSetting(u8),
    /// Device in the wrong state for an operation, even after recovery
    StatePrecondition {
        operation: &'static str,
        state: DfuState,
    },
    /// `DFU_GETSTATUS` kept stalling after the retries
    StatusStall { attempts: u32 },
    /// Post-condition of a completed download did not hold
    ProtocolInvariant {
        operation: &'static str,
        expected: DfuState,
        actual: DfuState,
    },
    BusyTimeout { state: DfuState, waited: Duration },
    MalformedStatus(usize),
    UnknownState(u8),
    AddressOutOfRange(u32),
    UnalignedAddress(u32),
    InvalidTransferSize,
    BlockOutOfRange(u32),
    PayloadTooLarge { len: usize, max: usize },
    ShortUpload { expected: usize, actual: usize },
    InvalidOptionBytes { len: usize, expected: usize },
}

impl DfuError {
    /// Endpoint stall reported by the bus for a single transfer.
    pub fn is_stall(&self) -> bool {
        matches!(self, DfuError::Transfer(TransferError::Stall))
    }

    /// Errors some bootloader revisions raise while committing option
    /// bytes: the write itself stalls or the device drops off the bus
    /// because it reloads the option bytes.
    pub fn is_benign_option_write_fault(&self) -> bool {
        matches!(
            self,
            DfuError::Transfer(TransferError::Stall)
                | DfuError::Transfer(TransferError::Disconnected)
        )
    }
}

impl std::error::Error for DfuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DfuError::Usb(err) => Some(err),
            DfuError::Transfer(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for DfuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DfuError::Usb(err) => write!(f, "USB error: {}", err),
            DfuError::Transfer(err) => write!(f, "Transfer error: {}", err),
            DfuError::NotFound { attempts } => {
                write!(f, "No DFU device found after {} attempts", attempts)
            }
            DfuError::NonUniqueDevice { count } => write!(
                f,
                "{} DFU devices match, select one by serial number",
                count
            ),
            DfuError::NoAltSetting(alt) => {
                write!(f, "No DFU alternate setting {}", alt)
            }
            DfuError::StatePrecondition { operation, state } => {
                write!(f, "Device in state {} cannot {}", state, operation)
            }
            DfuError::StatusStall { attempts } => write!(
                f,
                "Failed to get DFU status ({} stalled attempts)",
                attempts
            ),
            DfuError::ProtocolInvariant {
                operation,
                expected,
                actual,
            } => write!(
                f,
                "Device in state {} after {}, expected {}",
                actual, operation, expected
            ),
            DfuError::BusyTimeout { state, waited } => {
                write!(f, "Device still in state {} after {:?}", state, waited)
            }
            DfuError::MalformedStatus(len) => {
                write!(f, "Malformed DFU status ({} bytes)", len)
            }
            DfuError::UnknownState(code) => {
                write!(f, "Unknown DFU state {:#04x}", code)
            }
            DfuError::AddressOutOfRange(addr) => {
                write!(f, "Address {:#010x} below flash base", addr)
            }
            DfuError::UnalignedAddress(addr) => {
                write!(f, "Unaligned page address {:#010x}", addr)
            }
            DfuError::InvalidTransferSize => {
                write!(f, "Invalid transfer size")
            }
            DfuError::BlockOutOfRange(value) => {
                write!(f, "Block out of range ({:#x})", value)
            }
            DfuError::PayloadTooLarge { len, max } => {
                write!(f, "Payload of {} bytes exceeds {} bytes", len, max)
            }
            DfuError::ShortUpload { expected, actual } => {
                write!(f, "Short upload: {} of {} bytes", actual, expected)
            }
            DfuError::InvalidOptionBytes { len, expected } => write!(
                f,
                "Option bytes must be {} bytes, got {}",
                expected, len
            ),
        }
    }
}

impl From<nusb::Error> for DfuError {
    fn from(err: nusb::Error) -> Self {
        DfuError::Usb(err)
    }
}

impl From<TransferError> for DfuError {
    fn from(err: TransferError) -> Self {
        DfuError::Transfer(err)
    }
}
