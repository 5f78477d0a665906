use std::{num::NonZeroU8, thread, time::Duration};

use log::debug;
use nusb::MaybeFuture;

use crate::{
    DEFAULT_TIMEOUT, DeviceFamily, DfuDescriptor, DfuError, DfuSession,
    MemoryLayout, NusbTransport, Transport,
};

const DFU_CLASS: u8 = 0xFE;
const DFU_SUBCLASS: u8 = 0x1;

const DEFAULT_ATTEMPTS: u32 = 8;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Device visible on the bus before it is opened
pub trait Candidate {
    fn serial_number(&self) -> Option<&str>;

    /// Human readable location, for listings and logs
    fn describe(&self) -> String;
}

/// Where and how a session got bound
#[derive(Clone, Debug, Default)]
pub struct InterfaceBinding {
    pub interface: u8,
    pub alt_setting: u8,
    /// `wTransferSize` of the functional descriptor, 0 if unknown
    pub transfer_size: u16,
    pub layout: Option<MemoryLayout>,
}

/// Source of DFU devices
pub trait Backend {
    type Candidate: Candidate;
    type Transport: Transport;

    /// List devices carrying the family's vendor/product identity.
    fn enumerate(
        &self,
        family: &DeviceFamily,
    ) -> Result<Vec<Self::Candidate>, DfuError>;

    /// Open a candidate, claim the interface owning `alt_setting` and
    /// select it.
    fn open(
        &self,
        candidate: &Self::Candidate,
        alt_setting: u8,
    ) -> Result<(Self::Transport, InterfaceBinding), DfuError>;

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Discovery parameters
#[derive(Clone, Debug)]
pub struct FindOptions {
    pub family: DeviceFamily,
    pub serial: Option<String>,
    pub attempts: u32,
    pub backoff: Duration,
    pub alt_setting: u8,
}

impl FindOptions {
    pub fn new(family: DeviceFamily) -> Self {
        FindOptions {
            family,
            serial: None,
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            alt_setting: 0,
        }
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn alt_setting(mut self, alt_setting: u8) -> Self {
        self.alt_setting = alt_setting;
        self
    }
}

impl Default for FindOptions {
    fn default() -> Self {
        Self::new(DeviceFamily::default())
    }
}

/// Find exactly one device and open a session on it.
///
/// An empty bus is retried `attempts` times with `backoff` in between, as
/// the bootloader may still be enumerating. Several matches fail at once.
pub fn find<B: Backend>(
    backend: &B,
    options: &FindOptions,
) -> Result<DfuSession<B::Transport>, DfuError> {
    let attempts = options.attempts.max(1);
    for attempt in 1..=attempts {
        let mut candidates = backend.enumerate(&options.family)?;
        if let Some(serial) = &options.serial {
            candidates.retain(|c| c.serial_number() == Some(serial.as_str()));
        }
        match candidates.len() {
            0 => {
                debug!("no DFU device (attempt {}/{})", attempt, attempts);
                if attempt < attempts {
                    backend.sleep(options.backoff);
                }
            }
            1 => return open(backend, &candidates[0], options),
            count => return Err(DfuError::NonUniqueDevice { count }),
        }
    }
    Err(DfuError::NotFound { attempts })
}

/// Open a session on every matching device. The first device that fails
/// to open aborts the whole call.
pub fn find_all<B: Backend>(
    backend: &B,
    options: &FindOptions,
) -> Result<Vec<DfuSession<B::Transport>>, DfuError> {
    backend
        .enumerate(&options.family)?
        .iter()
        .map(|candidate| open(backend, candidate, options))
        .collect()
}

/// Matching devices, without opening them.
pub fn list<B: Backend>(
    backend: &B,
    family: &DeviceFamily,
) -> Result<Vec<B::Candidate>, DfuError> {
    backend.enumerate(family)
}

/// Open a session on one listed candidate.
pub fn open<B: Backend>(
    backend: &B,
    candidate: &B::Candidate,
    options: &FindOptions,
) -> Result<DfuSession<B::Transport>, DfuError> {
    debug!(
        "opening {} alt setting {}",
        candidate.describe(),
        options.alt_setting
    );
    let (transport, binding) = backend.open(candidate, options.alt_setting)?;
    Ok(DfuSession::new(transport, binding, options.family))
}

/// [Backend] over the system USB stack
#[derive(Clone, Copy, Debug, Default)]
pub struct NusbBackend;

impl Candidate for nusb::DeviceInfo {
    fn serial_number(&self) -> Option<&str> {
        nusb::DeviceInfo::serial_number(self)
    }

    fn describe(&self) -> String {
        format!(
            "Bus {} Device {:03}: ID {:04x}:{:04x}",
            self.bus_id(),
            self.device_address(),
            self.vendor_id(),
            self.product_id(),
        )
    }
}

impl Backend for NusbBackend {
    type Candidate = nusb::DeviceInfo;
    type Transport = NusbTransport;

    fn enumerate(
        &self,
        family: &DeviceFamily,
    ) -> Result<Vec<nusb::DeviceInfo>, DfuError> {
        Ok(nusb::list_devices()
            .wait()?
            .filter(|dev| family.matches(dev.vendor_id(), dev.product_id()))
            .collect())
    }

    fn open(
        &self,
        candidate: &nusb::DeviceInfo,
        alt_setting: u8,
    ) -> Result<(NusbTransport, InterfaceBinding), DfuError> {
        let device: nusb::Device = candidate.open().wait()?;

        let (config, interface, name_idx) = device
            .configurations()
            .find_map(|configuration| {
                let config = configuration.configuration_value();
                configuration
                    .interface_alt_settings()
                    .find(|alt| {
                        alt.class() == DFU_CLASS
                            && alt.subclass() == DFU_SUBCLASS
                            && alt.alternate_setting() == alt_setting
                    })
                    .map(|alt| {
                        (config, alt.interface_number(), alt.string_index())
                    })
            })
            .ok_or(DfuError::NoAltSetting(alt_setting))?;

        let descriptor = interface_descriptor(
            device
                .configurations()
                .filter(|c| c.configuration_value() == config)
                .flat_map(|c| {
                    c.interface_alt_settings()
                        .flat_map(|alt| {
                            let number = alt.interface_number();
                            alt.descriptors()
                                .map(|d| (number, d.to_vec()))
                                .collect::<Vec<_>>()
                        })
                        .collect::<Vec<_>>()
                }),
            interface,
        );

        let layout = name_idx
            .and_then(|idx| get_string_descriptor(&device, idx))
            .and_then(|name| MemoryLayout::parse(&name));

        let active = device
            .active_configuration()
            .map(|c| c.configuration_value())
            .ok();
        if active != Some(config) {
            debug!("setting configuration {}", config);
            device.set_configuration(config).wait()?;
        }

        let claimed = device.claim_interface(interface).wait()?;
        claimed.set_alt_setting(alt_setting).wait()?;

        Ok((
            NusbTransport::new(claimed),
            InterfaceBinding {
                interface,
                alt_setting,
                transfer_size: descriptor.transfer_size(),
                layout,
            },
        ))
    }
}

fn get_string_descriptor(
    device: &nusb::Device,
    desc_index: NonZeroU8,
) -> Option<String> {
    let language: u16 = device
        .get_string_descriptor_supported_languages(DEFAULT_TIMEOUT)
        .wait()
        .ok()?
        .next()
        .unwrap_or(nusb::descriptors::language_id::US_ENGLISH);

    device
        .get_string_descriptor(desc_index, language, DEFAULT_TIMEOUT)
        .wait()
        .ok()
}

/// Functional descriptor of `interface`, out of the `(interface number,
/// raw descriptor)` pairs of a configuration.
fn interface_descriptor(
    descriptors: impl IntoIterator<Item = (u8, Vec<u8>)>,
    interface: u8,
) -> DfuDescriptor {
    descriptors
        .into_iter()
        .filter(|(number, _)| *number == interface)
        .find_map(|(_, raw)| DfuDescriptor::parse(&raw))
        .unwrap_or_default()
}
