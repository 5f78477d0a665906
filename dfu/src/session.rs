use std::time::Duration;

use log::{debug, trace, warn};

use crate::address::*;
use crate::error::*;
use crate::{
    DEFAULT_TRANSFER_SIZE, DeviceFamily, DfuState, DfuStatus, InterfaceBinding,
    MemoryLayout, Transport, status::DFU_STATUS_LEN,
};

const DFU_CMD_DOWNLOAD: u8 = 1;
const DFU_CMD_UPLOAD: u8 = 2;
const DFU_CMD_GETSTATUS: u8 = 3;
const DFU_CMD_CLRSTATUS: u8 = 4;
const DFU_CMD_ABORT: u8 = 6;

/// Retries of a stalled `DFU_GETSTATUS`
const STATUS_STALL_RETRIES: u32 = 3;
const STATUS_STALL_BACKOFF: Duration = Duration::from_millis(10);

/// Device-reported wait tolerated in a busy state regardless of poll hints
const BUSY_WAIT_FLOOR: Duration = Duration::from_secs(30);
/// Busy wait ceiling as a multiple of the largest reported poll timeout
const BUSY_WAIT_FACTOR: u32 = 64;

const DOWNLOAD_STATES: &[DfuState] = &[DfuState::Idle, DfuState::DownloadIdle];
const UPLOAD_STATES: &[DfuState] = &[DfuState::Idle, DfuState::UploadIdle];

/// Open DfuSe session on one claimed interface
///
/// The session owns the transport exclusively; dropping it (or calling
/// [DfuSession::close]) releases the device.
pub struct DfuSession<T: Transport> {
    transport: T,
    family: DeviceFamily,
    interface: u8,
    alt_setting: u8,
    transfer_size: u16,
    layout: Option<MemoryLayout>,
    pointer_moved: bool,
}

impl<T: Transport> DfuSession<T> {
    pub fn new(
        transport: T,
        binding: InterfaceBinding,
        family: DeviceFamily,
    ) -> Self {
        DfuSession {
            transport,
            family,
            interface: binding.interface,
            alt_setting: binding.alt_setting,
            transfer_size: if binding.transfer_size > 0 {
                binding.transfer_size
            } else {
                DEFAULT_TRANSFER_SIZE
            },
            layout: binding.layout,
            pointer_moved: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
    pub fn family(&self) -> &DeviceFamily {
        &self.family
    }
    pub fn interface(&self) -> u8 {
        self.interface
    }
    pub fn alt_setting(&self) -> u8 {
        self.alt_setting
    }
    pub fn transfer_size(&self) -> u16 {
        self.transfer_size
    }
    pub fn layout(&self) -> Option<&MemoryLayout> {
        self.layout.as_ref()
    }

    /// Release the device.
    pub fn close(self) {
        debug!("closing DFU session on interface {}", self.interface);
    }

    /// Query `DFU_GETSTATUS`, riding out short endpoint stalls.
    pub fn get_status(&self) -> Result<DfuStatus, DfuError> {
        let mut retries = STATUS_STALL_RETRIES;
        loop {
            match self.transport.control_in(DFU_CMD_GETSTATUS, 0, DFU_STATUS_LEN) {
                Ok(data) => {
                    let st = DfuStatus::from_raw(&data)?;
                    trace!("status: {:?}", st);
                    return Ok(st);
                }
                Err(err) if err.is_stall() => {
                    if retries == 0 {
                        return Err(DfuError::StatusStall {
                            attempts: STATUS_STALL_RETRIES + 1,
                        });
                    }
                    retries -= 1;
                    debug!("GETSTATUS stalled, {} retries left", retries);
                    self.transport.sleep(STATUS_STALL_BACKOFF);
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn state(&self) -> Result<DfuState, DfuError> {
        Ok(self.get_status()?.state)
    }

    pub fn clear_status(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_CLRSTATUS, 0, &[])
    }

    pub fn abort(&self) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_ABORT, 0, &[])
    }

    /// Bring the device back to `dfuIDLE` with a clean status.
    pub fn reset_state(&self) -> Result<(), DfuError> {
        let mut st = self.get_status()?;
        if !st.is_ok() || st.state == DfuState::Error {
            self.clear_status()?;
            st = self.get_status()?;
        }
        if st.state != DfuState::Idle {
            self.abort()?;
            st = self.get_status()?;
        }
        if st.state != DfuState::Idle {
            return Err(DfuError::StatePrecondition {
                operation: "reset",
                state: st.state,
            });
        }
        Ok(())
    }

    /// Poll while the device reports `state`, sleeping for the reported
    /// poll timeout between queries. Returns the first status in another
    /// state.
    pub fn block_on_state(
        &self,
        state: DfuState,
    ) -> Result<DfuStatus, DfuError> {
        let mut waited = Duration::ZERO;
        let mut ceiling = BUSY_WAIT_FLOOR;
        loop {
            let st = self.get_status()?;
            if st.state != state {
                return Ok(st);
            }
            let timeout = Duration::from_millis(st.poll_timeout_ms as u64);
            ceiling = ceiling.max(timeout * BUSY_WAIT_FACTOR);
            // zero hints still count so a stuck device hits the ceiling
            waited += timeout.max(Duration::from_millis(1));
            if waited > ceiling {
                return Err(DfuError::BusyTimeout { state, waited });
            }
            self.transport.sleep(timeout);
        }
    }

    /// Make sure the device accepts `operation`: clear a latched error
    /// (twice, one clear is not always enough) or abort out of the
    /// opposite transfer phase.
    pub(crate) fn ensure_state(
        &self,
        allowed: &[DfuState],
        operation: &'static str,
    ) -> Result<(), DfuError> {
        let state = self.state()?;
        if allowed.contains(&state) {
            return Ok(());
        }
        match state {
            DfuState::Error => {
                warn!("device in {}, clearing status before {}", state, operation);
                self.clear_status()?;
                self.clear_status()?;
            }
            DfuState::DownloadIdle | DfuState::UploadIdle => {
                debug!("aborting {} before {}", state, operation);
                self.abort()?;
            }
            _ => {
                return Err(DfuError::StatePrecondition { operation, state });
            }
        }
        let state = self.state()?;
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(DfuError::StatePrecondition { operation, state })
        }
    }

    pub(crate) fn expect_download_idle(
        &self,
        operation: &'static str,
    ) -> Result<(), DfuError> {
        let st = self.block_on_state(DfuState::DownloadBusy)?;
        if st.state != DfuState::DownloadIdle {
            return Err(DfuError::ProtocolInvariant {
                operation,
                expected: DfuState::DownloadIdle,
                actual: st.state,
            });
        }
        Ok(())
    }

    /// Raw `DFU_DNLOAD` of `data` as block `block`.
    pub fn download(&self, block: u16, data: &[u8]) -> Result<(), DfuError> {
        self.transport.control_out(DFU_CMD_DOWNLOAD, block, data)
    }

    /// Raw `DFU_UPLOAD` of `length` bytes from block `block`.
    pub fn upload(&self, block: u16, length: u16) -> Result<Vec<u8>, DfuError> {
        let data = self.transport.control_in(DFU_CMD_UPLOAD, block, length)?;
        if data.len() != length as usize {
            return Err(DfuError::ShortUpload {
                expected: length as usize,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    /// Move the DfuSe address pointer.
    ///
    /// Takes effect with the next status query; callers follow up with
    /// [DfuSession::get_status] or [DfuSession::block_on_state].
    pub fn set_address_pointer(&mut self, address: u32) -> Result<(), DfuError> {
        let mut cmd = vec![self.family.cmd_set_address];
        cmd.extend(address_bytes(address));
        debug!("set address pointer {:#010x}", address);
        self.download(0, &cmd)?;
        self.pointer_moved = address != self.family.flash_base;
        Ok(())
    }

    /// Erase the flash page containing `address`.
    pub fn erase(&self, address: u32) -> Result<(), DfuError> {
        self.ensure_state(DOWNLOAD_STATES, "erase")?;
        let mut cmd = vec![self.family.cmd_erase];
        cmd.extend(address_bytes(address));
        debug!("erase page {:#010x}", address);
        self.download(0, &cmd)?;
        self.expect_download_idle("erase")
    }

    pub fn mass_erase(&self) -> Result<(), DfuError> {
        self.ensure_state(DOWNLOAD_STATES, "mass erase")?;
        debug!("mass erase");
        self.download(0, &[self.family.cmd_erase])?;
        self.expect_download_idle("mass erase")
    }

    /// Program `data` at a flash address.
    ///
    /// The bootloader scales the block number by the length of the request,
    /// so the block is derived from `data.len()`.
    pub fn write_page(&mut self, address: u32, data: &[u8]) -> Result<(), DfuError> {
        let block = self.flash_block(address, data.len())?;
        self.write_block(block, data)
    }

    /// Read `size` bytes at a flash address.
    pub fn read_memory(&mut self, address: u32, size: u16) -> Result<Vec<u8>, DfuError> {
        let block = self.flash_block(address, size as usize)?;
        self.read_block(block, size)
    }

    fn check_payload(&self, len: usize) -> Result<u16, DfuError> {
        if len > self.transfer_size as usize {
            return Err(DfuError::PayloadTooLarge {
                len,
                max: self.transfer_size as usize,
            });
        }
        match len {
            0 => Err(DfuError::InvalidTransferSize),
            len => Ok(len as u16),
        }
    }

    pub(crate) fn write_block(&self, block: u16, data: &[u8]) -> Result<(), DfuError> {
        self.check_payload(data.len())?;
        self.ensure_state(DOWNLOAD_STATES, "write")?;
        trace!("download block {} ({} bytes)", block, data.len());
        self.download(block, data)?;
        self.expect_download_idle("write")
    }

    pub(crate) fn read_block(&self, block: u16, size: u16) -> Result<Vec<u8>, DfuError> {
        self.check_payload(size as usize)?;
        self.ensure_state(UPLOAD_STATES, "read")?;
        trace!("upload block {} ({} bytes)", block, size);
        self.upload(block, size)
    }

    /// Block number for a `len`-byte transfer at a flash address.
    ///
    /// Addresses aligned to `len` are numbered from the flash base, anything
    /// else gets the address pointer moved onto it and uses the first data
    /// block.
    fn flash_block(&mut self, address: u32, len: usize) -> Result<u16, DfuError> {
        let base = self.family.flash_base;
        if address < base {
            return Err(DfuError::AddressOutOfRange(address));
        }
        let len = self.check_payload(len)?;
        let block = if (address - base) % len as u32 == 0 {
            address_to_block(address, len, base).ok()
        } else {
            None
        };
        match block {
            Some(block) => {
                if self.pointer_moved {
                    self.move_pointer(base)?;
                }
                Ok(block)
            }
            None => {
                debug!("unaligned {} byte transfer at {:#010x}", len, address);
                self.move_pointer(address)?;
                Ok(FIRST_DATA_BLOCK)
            }
        }
    }

    /// Set the address pointer and wait until the device applied it.
    pub(crate) fn move_pointer(&mut self, address: u32) -> Result<(), DfuError> {
        self.ensure_state(DOWNLOAD_STATES, "set address")?;
        self.set_address_pointer(address)?;
        self.expect_download_idle("set address")
    }

    /// Leave DFU mode with a zero-length download to block 0.
    ///
    /// The device resets afterwards, so the session is consumed.
    pub fn detach(self) -> Result<DfuStatus, DfuError> {
        self.ensure_state(DOWNLOAD_STATES, "detach")?;
        debug!("detaching");
        self.download(0, &[])?;
        self.get_status()
    }
}
