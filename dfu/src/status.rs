use std::fmt;

use crate::DfuError;

pub(crate) const DFU_STATUS_LEN: u16 = 6;

/// DFU device states (DFU 1.1, section 6.1.2)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuState {
    AppIdle = 0x00,
    AppDetach = 0x01,
    Idle = 0x02,
    DownloadSync = 0x03,
    DownloadBusy = 0x04,
    DownloadIdle = 0x05,
    ManifestSync = 0x06,
    Manifest = 0x07,
    ManifestWaitReset = 0x08,
    UploadIdle = 0x09,
    Error = 0x0a,
}

impl TryFrom<u8> for DfuState {
    type Error = DfuError;

    fn try_from(value: u8) -> Result<Self, DfuError> {
        Ok(match value {
            0x00 => DfuState::AppIdle,
            0x01 => DfuState::AppDetach,
            0x02 => DfuState::Idle,
            0x03 => DfuState::DownloadSync,
            0x04 => DfuState::DownloadBusy,
            0x05 => DfuState::DownloadIdle,
            0x06 => DfuState::ManifestSync,
            0x07 => DfuState::Manifest,
            0x08 => DfuState::ManifestWaitReset,
            0x09 => DfuState::UploadIdle,
            0x0a => DfuState::Error,
            other => return Err(DfuError::UnknownState(other)),
        })
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DfuState::AppIdle => "appIDLE",
            DfuState::AppDetach => "appDETACH",
            DfuState::Idle => "dfuIDLE",
            DfuState::DownloadSync => "dfuDNLOAD-SYNC",
            DfuState::DownloadBusy => "dfuDNBUSY",
            DfuState::DownloadIdle => "dfuDNLOAD-IDLE",
            DfuState::ManifestSync => "dfuMANIFEST-SYNC",
            DfuState::Manifest => "dfuMANIFEST",
            DfuState::ManifestWaitReset => "dfuMANIFEST-WAIT-RESET",
            DfuState::UploadIdle => "dfuUPLOAD-IDLE",
            DfuState::Error => "dfuERROR",
        };
        f.write_str(name)
    }
}

/// Snapshot of a `DFU_GETSTATUS` response
///
/// Only valid for the polling step that fetched it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DfuStatus {
    pub state: DfuState,
    pub poll_timeout_ms: u32,
    pub status_code: u8,
}

impl DfuStatus {
    /// Decode `{bStatus, bwPollTimeout[3], bState, iString}`.
    pub fn from_raw(data: &[u8]) -> Result<Self, DfuError> {
        if data.len() < DFU_STATUS_LEN as usize {
            return Err(DfuError::MalformedStatus(data.len()));
        }
        Ok(DfuStatus {
            status_code: data[0],
            poll_timeout_ms: u32::from_le_bytes([data[1], data[2], data[3], 0]),
            state: DfuState::try_from(data[4])?,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 0
    }
}
