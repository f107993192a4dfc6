//! Control transfers and descriptor helpers
//!
//! Every control request goes out with a fixed 6 ms timeout. When the caller
//! supplies no data buffer a fresh zero-filled scratch region is used for that
//! call only, so nothing written by one transfer is visible to the next.
//!
//! Failures come back as a [`TransferOutcome`] rather than a panic or an
//! error type: the host status plus the length the host reports, which is
//! authoritative over the requested length.

use crate::connection::Connection;
use crate::error::TransferError;
use crate::host::UsbHost;
use protocol::{
    Configuration, DEVICE_DESCRIPTOR_LEN, DescriptorType, DeviceDescriptor, RequestType,
    STRING_DESCRIPTOR_BUFFER_LEN, SetupPacket, StringDescriptor, TransferOutcome, UsbError,
};
use std::time::Duration;
use tracing::debug;

/// Completion and no-data timeout of every control transfer
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(6);

/// Size of the per-call scratch region used when no buffer is supplied
pub const SCRATCH_LEN: usize = 4096;

/// Request buffer for a configuration descriptor chain
pub const CONFIGURATION_BUFFER_LEN: usize = 512;

/// Hook observing control transfers as they complete
///
/// `data` is the part of the data stage the host reported as transferred.
pub trait TransferTrace {
    fn on_control(&mut self, setup: &SetupPacket, outcome: &TransferOutcome, data: &[u8]);
}

impl<F> TransferTrace for F
where
    F: FnMut(&SetupPacket, &TransferOutcome, &[u8]),
{
    fn on_control(&mut self, setup: &SetupPacket, outcome: &TransferOutcome, data: &[u8]) {
        self(setup, outcome, data)
    }
}

impl<H: UsbHost> Connection<H> {
    /// Issue a control request on the open device
    ///
    /// With `data` set, the first `length` bytes of it form the data stage.
    /// Without it, a zero-filled region of up to [`SCRATCH_LEN`] bytes is
    /// allocated for this call. Lengths that do not fit either buffer or the
    /// 16-bit wLength field fail with `InvalidParam`; a connection that is not
    /// open fails with `NoDevice`.
    pub fn control_transfer(
        &mut self,
        request_type: RequestType,
        request: u8,
        value: u16,
        index: u16,
        data: Option<&mut [u8]>,
        length: usize,
    ) -> TransferOutcome {
        let Ok(wire_length) = u16::try_from(length) else {
            return TransferOutcome::failed(UsbError::InvalidParam);
        };
        let Some(device) = self.device.as_ref().filter(|_| self.is_open()) else {
            return TransferOutcome::failed(UsbError::NoDevice);
        };

        let setup = SetupPacket {
            request_type,
            request,
            value,
            index,
            length: wire_length,
        };

        let mut scratch;
        let buf: &mut [u8] = match data {
            Some(buf) if length <= buf.len() => &mut buf[..length],
            None if length <= SCRATCH_LEN => {
                scratch = vec![0u8; SCRATCH_LEN];
                &mut scratch[..length]
            }
            _ => return TransferOutcome::failed(UsbError::InvalidParam),
        };

        let outcome = self
            .host
            .control_transfer(device, &setup, buf, CONTROL_TIMEOUT);

        debug!(
            "Control transfer: request_type={:#04x}, request={:#04x}, value={:#06x}, index={:#06x}, length={} -> {:?}",
            request_type.0, request, value, index, length, outcome
        );

        if let Some(trace) = self.trace.as_mut() {
            let transferred = outcome.length.min(buf.len());
            trace.on_control(&setup, &outcome, &buf[..transferred]);
        }

        outcome
    }

    /// Fetch descriptor `index` of `descriptor_type` into `buf`
    ///
    /// Requests exactly `buf.len()` bytes. String descriptors are requested in
    /// US English.
    pub fn get_descriptor(
        &mut self,
        descriptor_type: DescriptorType,
        index: u8,
        buf: &mut [u8],
    ) -> TransferOutcome {
        let length = buf.len();
        let setup = SetupPacket::get_descriptor(descriptor_type, index, 0);
        self.control_transfer(
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            Some(buf),
            length,
        )
    }

    fn fetch_descriptor(
        &mut self,
        descriptor_type: DescriptorType,
        index: u8,
        buf: &mut [u8],
    ) -> Result<usize, TransferError> {
        if !self.is_open() {
            return Err(TransferError::NotOpen);
        }
        Ok(self
            .get_descriptor(descriptor_type, index, buf)
            .into_result()?)
    }

    /// Device descriptor; anything but a full 18-byte reply is an error
    pub fn device_descriptor(&mut self) -> Result<DeviceDescriptor, TransferError> {
        let mut buf = [0u8; DEVICE_DESCRIPTOR_LEN];
        let actual = self.fetch_descriptor(DescriptorType::Device, 0, &mut buf)?;
        if actual != DEVICE_DESCRIPTOR_LEN {
            return Err(TransferError::ShortTransfer {
                expected: DEVICE_DESCRIPTOR_LEN,
                actual,
            });
        }
        Ok(DeviceDescriptor::parse(&buf)?)
    }

    /// Configuration descriptor chain `index`
    pub fn configuration(&mut self, index: u8) -> Result<Configuration, TransferError> {
        let mut buf = [0u8; CONFIGURATION_BUFFER_LEN];
        let actual = self.fetch_descriptor(DescriptorType::Config, index, &mut buf)?;
        Ok(Configuration::parse(&buf[..actual])?)
    }

    /// Every configuration the device declares, in index order
    ///
    /// Reads the device descriptor and fetches configurations
    /// `0..bNumConfigurations`; the first failure aborts the walk.
    pub fn configurations(&mut self) -> Result<Vec<Configuration>, TransferError> {
        let count = self.device_descriptor()?.num_configurations;
        let configurations = (0..count)
            .map(|index| self.configuration(index))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Read {} configuration(s)", configurations.len());
        Ok(configurations)
    }

    /// String descriptor `index`, decoded to ASCII
    ///
    /// Lossy: high bytes are dropped and the last code unit is replaced by
    /// the terminator. The named helpers below decode the full text instead.
    pub fn string_descriptor(&mut self, index: u8) -> Result<String, TransferError> {
        let mut buf = [0u8; STRING_DESCRIPTOR_BUFFER_LEN];
        let actual = self.fetch_descriptor(DescriptorType::String, index, &mut buf)?;

        let descriptor = StringDescriptor::new(&buf[..actual])?;
        let mut text = [0u8; STRING_DESCRIPTOR_BUFFER_LEN];
        let count = descriptor.decode_into(&mut text)?;

        Ok(text[..count.saturating_sub(1)]
            .iter()
            .map(|&b| b as char)
            .collect())
    }

    /// Language ids from string descriptor 0
    pub fn languages(&mut self) -> Result<Vec<u16>, TransferError> {
        let mut buf = [0u8; STRING_DESCRIPTOR_BUFFER_LEN];
        let actual = self.fetch_descriptor(DescriptorType::String, 0, &mut buf)?;
        Ok(StringDescriptor::new(&buf[..actual])?.languages())
    }

    /// String descriptor `index` as UTF-16 text
    pub fn string_text(&mut self, index: u8) -> Result<String, TransferError> {
        let mut buf = [0u8; STRING_DESCRIPTOR_BUFFER_LEN];
        let actual = self.fetch_descriptor(DescriptorType::String, index, &mut buf)?;
        Ok(StringDescriptor::new(&buf[..actual])?.decode_utf16())
    }

    pub fn manufacturer(&mut self) -> Result<Option<String>, TransferError> {
        let index = self.device_descriptor()?.manufacturer_string_index();
        index.map(|i| self.string_text(i)).transpose()
    }

    pub fn product(&mut self) -> Result<Option<String>, TransferError> {
        let index = self.device_descriptor()?.product_string_index();
        index.map(|i| self.string_text(i)).transpose()
    }

    /// Serial number string; `None` when the device declares none
    pub fn serial_number(&mut self) -> Result<Option<String>, TransferError> {
        let index = self.device_descriptor()?.serial_number_string_index();
        index.map(|i| self.string_text(i)).transpose()
    }
}
