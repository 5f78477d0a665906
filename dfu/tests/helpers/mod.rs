#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell, RefMut},
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use nusb::transfer::TransferError;
use solodfu::{
    Backend, Candidate, DeviceFamily, DfuError, DfuSession, DfuState,
    InterfaceBinding, Transport,
};

pub const TRANSFER_SIZE: u16 = 2048;
pub const FLASH_BASE: u32 = 0x0800_0000;
pub const FLASH_SIZE: u32 = 256 * 1024;
pub const OPTION_BYTES: u32 = 0x1fff_7800;

const REQ_DNLOAD: u8 = 1;
const REQ_UPLOAD: u8 = 2;
const REQ_GETSTATUS: u8 = 3;
const REQ_CLRSTATUS: u8 = 4;
const REQ_ABORT: u8 = 6;

const ERR_UNKNOWN: u8 = 0x0e;

pub fn binding() -> InterfaceBinding {
    InterfaceBinding {
        interface: 0,
        alt_setting: 0,
        transfer_size: TRANSFER_SIZE,
        layout: None,
    }
}

pub fn session<T: Transport>(transport: T) -> DfuSession<T> {
    DfuSession::new(transport, binding(), DeviceFamily::STM32L4)
}

fn raw_status(state: DfuState, status: u8, poll_timeout_ms: u32) -> Vec<u8> {
    let t = poll_timeout_ms.to_le_bytes();
    vec![status, t[0], t[1], t[2], state as u8, 0]
}

/// Class request as seen by a mock transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub request: u8,
    pub value: u16,
    pub data: Vec<u8>,
    pub length: u16,
}

/// Queued answer to a `DFU_GETSTATUS`
pub enum Reply {
    Status(DfuState, u32),
    Stall,
    Fail(TransferError),
}

/// Transport replaying a fixed list of status replies
#[derive(Default)]
pub struct ScriptedTransport {
    statuses: RefCell<VecDeque<Reply>>,
    uploads: RefCell<VecDeque<Vec<u8>>>,
    pub requests: RefCell<Vec<Request>>,
    pub sleeps: RefCell<Vec<Duration>>,
}

impl ScriptedTransport {
    pub fn new(statuses: impl IntoIterator<Item = Reply>) -> Self {
        ScriptedTransport {
            statuses: RefCell::new(statuses.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn with_uploads(self, uploads: impl IntoIterator<Item = Vec<u8>>) -> Self {
        self.uploads.borrow_mut().extend(uploads);
        self
    }

    pub fn count(&self, request: u8) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.request == request)
            .count()
    }

    pub fn status_queries(&self) -> usize {
        self.count(REQ_GETSTATUS)
    }

    pub fn downloads(&self) -> Vec<Request> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.request == REQ_DNLOAD)
            .cloned()
            .collect()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Transport for ScriptedTransport {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        self.requests.borrow_mut().push(Request {
            request,
            value,
            data: Vec::new(),
            length,
        });
        match request {
            REQ_GETSTATUS => {
                match self
                    .statuses
                    .borrow_mut()
                    .pop_front()
                    .expect("unexpected GETSTATUS")
                {
                    Reply::Status(state, timeout) => {
                        let code = if state == DfuState::Error { ERR_UNKNOWN } else { 0 };
                        Ok(raw_status(state, code, timeout))
                    }
                    Reply::Stall => Err(TransferError::Stall.into()),
                    Reply::Fail(err) => Err(err.into()),
                }
            }
            REQ_UPLOAD => Ok(self
                .uploads
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| vec![0; length as usize])),
            _ => panic!("unexpected IN request {request}"),
        }
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        self.requests.borrow_mut().push(Request {
            request,
            value,
            data: data.to_vec(),
            length: data.len() as u16,
        });
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }
}

#[derive(Debug)]
enum Pending {
    SetAddress(u32),
    Erase(u32),
    MassErase,
    Write(u32, Vec<u8>),
}

/// Simulated ST DfuSe bootloader
pub struct SimState {
    pub state: DfuState,
    pub status: u8,
    pub pointer: u32,
    pub poll_timeout_ms: u32,
    pub memory: BTreeMap<u32, u8>,
    pub option_writes: usize,
    pub erased_pages: Vec<u32>,
    pub mass_erases: usize,
    pub status_queries: usize,
    pub sleeps: Vec<Duration>,
    /// Fail the next download of this block with this error
    pub fail_block: Option<(u16, TransferError)>,
    /// Stall this many upcoming status queries
    pub stall_status: u32,
    /// Clear requests swallowed before the error state is left
    pub sticky_errors: u32,
    /// End every download in dfuERROR instead of dfuDNLOAD-IDLE
    pub fault_on_apply: bool,
    pending: Option<Pending>,
}

pub struct SimDevice {
    state: RefCell<SimState>,
}

impl Default for SimDevice {
    fn default() -> Self {
        SimDevice {
            state: RefCell::new(SimState {
                state: DfuState::Idle,
                status: 0,
                pointer: FLASH_BASE,
                poll_timeout_ms: 20,
                memory: BTreeMap::new(),
                option_writes: 0,
                erased_pages: Vec::new(),
                mass_erases: 0,
                status_queries: 0,
                sleeps: Vec::new(),
                fail_block: None,
                stall_status: 0,
                sticky_errors: 0,
                fault_on_apply: false,
                pending: None,
            }),
        }
    }
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option_bytes(self, bytes: &[u8]) -> Self {
        self.load(OPTION_BYTES, bytes);
        self
    }

    pub fn state(&self) -> RefMut<'_, SimState> {
        self.state.borrow_mut()
    }

    pub fn load(&self, addr: u32, bytes: &[u8]) {
        let mut st = self.state.borrow_mut();
        for (i, b) in bytes.iter().enumerate() {
            st.memory.insert(addr + i as u32, *b);
        }
    }

    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let st = self.state.borrow();
        (0..len as u32)
            .map(|i| *st.memory.get(&(addr + i)).unwrap_or(&0xff))
            .collect()
    }
}

impl SimState {
    fn fail(&mut self) -> DfuError {
        self.state = DfuState::Error;
        self.status = ERR_UNKNOWN;
        TransferError::Stall.into()
    }

    fn apply(&mut self) {
        match self.pending.take() {
            Some(Pending::SetAddress(addr)) => self.pointer = addr,
            Some(Pending::Erase(addr)) => {
                let page = addr - (addr - FLASH_BASE) % 2048;
                self.memory.retain(|a, _| !(page..page + 2048).contains(a));
                self.erased_pages.push(page);
            }
            Some(Pending::MassErase) => {
                self.memory
                    .retain(|a, _| !(FLASH_BASE..FLASH_BASE + FLASH_SIZE).contains(a));
                self.mass_erases += 1;
            }
            Some(Pending::Write(addr, data)) => {
                if addr == OPTION_BYTES {
                    self.option_writes += 1;
                }
                for (i, b) in data.into_iter().enumerate() {
                    self.memory.insert(addr + i as u32, b);
                }
            }
            None => {}
        }
        if self.fault_on_apply {
            self.state = DfuState::Error;
            self.status = ERR_UNKNOWN;
        } else {
            self.state = DfuState::DownloadIdle;
        }
    }

    fn get_status(&mut self) -> Vec<u8> {
        match self.state {
            DfuState::DownloadSync => self.state = DfuState::DownloadBusy,
            DfuState::DownloadBusy => self.apply(),
            DfuState::ManifestSync => self.state = DfuState::Manifest,
            _ => {}
        }
        let timeout = if self.state == DfuState::DownloadBusy {
            self.poll_timeout_ms
        } else {
            0
        };
        raw_status(self.state, self.status, timeout)
    }
}

impl Transport for SimDevice {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let mut st = self.state.borrow_mut();
        match request {
            REQ_GETSTATUS => {
                st.status_queries += 1;
                if st.stall_status > 0 {
                    st.stall_status -= 1;
                    return Err(TransferError::Stall.into());
                }
                Ok(st.get_status())
            }
            REQ_UPLOAD => {
                if !matches!(st.state, DfuState::Idle | DfuState::UploadIdle) || value < 2 {
                    return Err(st.fail());
                }
                let addr = st.pointer + (value as u32 - 2) * length as u32;
                st.state = DfuState::UploadIdle;
                Ok((0..length as u32)
                    .map(|i| *st.memory.get(&(addr + i)).unwrap_or(&0xff))
                    .collect())
            }
            _ => Err(st.fail()),
        }
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        let mut st = self.state.borrow_mut();
        match request {
            REQ_DNLOAD => {
                if !matches!(st.state, DfuState::Idle | DfuState::DownloadIdle) {
                    return Err(st.fail());
                }
                if st.fail_block.as_ref().is_some_and(|(b, _)| *b == value) {
                    if let Some((_, err)) = st.fail_block.take() {
                        st.state = DfuState::Error;
                        st.status = ERR_UNKNOWN;
                        return Err(err.into());
                    }
                }
                let pending = match (value, data) {
                    (0, []) => {
                        st.state = DfuState::ManifestSync;
                        return Ok(());
                    }
                    (0, [0x21, a @ ..]) if a.len() == 4 => {
                        Pending::SetAddress(u32::from_le_bytes([a[0], a[1], a[2], a[3]]))
                    }
                    (0, [0x41]) => Pending::MassErase,
                    (0, [0x41, a @ ..]) if a.len() == 4 => {
                        Pending::Erase(u32::from_le_bytes([a[0], a[1], a[2], a[3]]))
                    }
                    (block, data) if block >= 2 => Pending::Write(
                        st.pointer + (block as u32 - 2) * data.len() as u32,
                        data.to_vec(),
                    ),
                    _ => return Err(st.fail()),
                };
                st.pending = Some(pending);
                st.state = DfuState::DownloadSync;
                Ok(())
            }
            REQ_CLRSTATUS => {
                if st.state == DfuState::Error {
                    if st.sticky_errors > 0 {
                        st.sticky_errors -= 1;
                    } else {
                        st.state = DfuState::Idle;
                        st.status = 0;
                    }
                }
                Ok(())
            }
            REQ_ABORT => {
                if matches!(
                    st.state,
                    DfuState::Idle | DfuState::DownloadIdle | DfuState::UploadIdle
                ) {
                    st.state = DfuState::Idle;
                }
                Ok(())
            }
            _ => Err(st.fail()),
        }
    }

    fn sleep(&self, duration: Duration) {
        self.state.borrow_mut().sleeps.push(duration);
    }
}

#[derive(Clone, Debug)]
pub struct MockCandidate {
    pub name: String,
    pub serial: Option<String>,
}

impl MockCandidate {
    pub fn new(name: &str, serial: Option<&str>) -> Self {
        MockCandidate {
            name: name.to_string(),
            serial: serial.map(str::to_string),
        }
    }
}

impl Candidate for MockCandidate {
    fn serial_number(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Discovery backend over a fixed device list
#[derive(Default)]
pub struct MockBackend {
    pub devices: Vec<MockCandidate>,
    /// Devices only show up from this enumeration on (1-based)
    pub visible_from: u32,
    /// Name of a device whose open fails
    pub broken: Option<String>,
    pub enumerations: Cell<u32>,
    pub sleeps: RefCell<Vec<Duration>>,
    pub opened: RefCell<Vec<(String, u8)>>,
}

impl MockBackend {
    pub fn new(devices: Vec<MockCandidate>) -> Self {
        MockBackend {
            devices,
            ..Default::default()
        }
    }
}

impl Backend for MockBackend {
    type Candidate = MockCandidate;
    type Transport = SimDevice;

    fn enumerate(
        &self,
        _family: &DeviceFamily,
    ) -> Result<Vec<MockCandidate>, DfuError> {
        let n = self.enumerations.get() + 1;
        self.enumerations.set(n);
        if n < self.visible_from {
            Ok(Vec::new())
        } else {
            Ok(self.devices.clone())
        }
    }

    fn open(
        &self,
        candidate: &MockCandidate,
        alt_setting: u8,
    ) -> Result<(SimDevice, InterfaceBinding), DfuError> {
        if self.broken.as_deref() == Some(candidate.name.as_str()) {
            return Err(TransferError::Disconnected.into());
        }
        self.opened
            .borrow_mut()
            .push((candidate.name.clone(), alt_setting));
        Ok((
            SimDevice::new(),
            InterfaceBinding {
                alt_setting,
                ..binding()
            },
        ))
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }
}
