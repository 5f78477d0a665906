use std::{thread, time::Duration};

use nusb::{
    MaybeFuture,
    transfer::{ControlIn, ControlOut, ControlType, Recipient},
};

use crate::DEFAULT_TIMEOUT;
use crate::error::*;

/// Synchronous DFU class request channel
///
/// Implementations address the claimed DFU interface: every request is a
/// class request with the interface as recipient and the interface number
/// as `wIndex`. At most one request is outstanding at any time.
pub trait Transport {
    /// Device-to-host class request reading up to `length` bytes.
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError>;

    /// Host-to-device class request with an optional data stage.
    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError>;

    /// Block the caller; used for poll timeouts and retry backoff.
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        (**self).control_in(request, value, length)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        (**self).control_out(request, value, data)
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// [Transport] over a claimed [`nusb::Interface`]
pub struct NusbTransport {
    interface: nusb::Interface,
}

impl NusbTransport {
    pub fn new(interface: nusb::Interface) -> Self {
        NusbTransport { interface }
    }

    pub fn interface_number(&self) -> u8 {
        self.interface.interface_number()
    }
}

impl Transport for NusbTransport {
    fn control_in(
        &self,
        request: u8,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, DfuError> {
        let index = self.interface.interface_number() as u16;
        Ok(self
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    length,
                },
                DEFAULT_TIMEOUT,
            )
            .wait()?)
    }

    fn control_out(
        &self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<(), DfuError> {
        let index = self.interface.interface_number() as u16;
        Ok(self
            .interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request,
                    value,
                    index,
                    data,
                },
                DEFAULT_TIMEOUT,
            )
            .wait()?)
    }
}
