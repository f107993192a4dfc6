//! Host USB stack collaborator
//!
//! The client never talks to the operating system directly. Everything it
//! needs from the host stack (service lookup, handle lifetime, primitive
//! transfers, arrival and departure watches) goes through [`UsbHost`].
//!
//! Two implementations ship with the crate:
//! - [`RusbHost`]: libusb through `rusb`
//! - [`MockHost`]: scripted in-memory devices for tests

mod mock;
mod libusb;

pub use self::mock::{
    FailStep, MockCall, MockDevice, MockDeviceHandle, MockHost, MockInterfaceHandle,
    MockInterfaceService, MockService, MockWatch,
};
pub use self::libusb::{RusbDevice, RusbHost, RusbInterface, RusbInterfaceService, map_rusb_error};

use protocol::{
    DeviceIdentity, InterfaceDescriptor, MatchFilter, PipeProperties, SetupPacket,
    TransferOutcome, UsbError,
};
use std::time::Duration;

/// Which notifications a watch delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Devices that appeared (first match)
    Arrival,
    /// Devices that were removed (terminated)
    Departure,
}

/// Interface lookup request; `None` fields match anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceRequest {
    pub class: Option<u8>,
    pub subclass: Option<u8>,
    pub protocol: Option<u8>,
    pub alternate_setting: Option<u8>,
}

impl InterfaceRequest {
    /// Don't-care request: every interface matches
    pub const ANY: Self = Self {
        class: None,
        subclass: None,
        protocol: None,
        alternate_setting: None,
    };

    pub fn matches(&self, descriptor: &InterfaceDescriptor) -> bool {
        self.class.is_none_or(|c| c == descriptor.class)
            && self.subclass.is_none_or(|s| s == descriptor.subclass)
            && self.protocol.is_none_or(|p| p == descriptor.protocol)
            && self
                .alternate_setting
                .is_none_or(|a| a == descriptor.alternate_setting)
    }
}

/// Callback invoked with each batch of services a watch reports
pub type WatchCallback<S> = Box<dyn FnMut(Vec<S>) + Send>;

/// Host USB stack operations used by the client
///
/// Handles are owned values: closing consumes them and dropping a service
/// reference releases it. Dropping a [`UsbHost::Watch`] uninstalls it.
pub trait UsbHost: Clone + Send + 'static {
    /// Reference to a matched device that has not been opened
    type Service;
    /// Open, exclusively held device
    type Device;
    /// Reference to an interface of an open device
    type InterfaceService;
    /// Open, exclusively held interface
    type Interface;
    /// Installed watch registration
    type Watch;

    /// Services currently attached that pass `filter`
    fn match_services(&self, filter: &MatchFilter) -> Result<Vec<Self::Service>, UsbError>;

    /// Stable identity of a service; also valid for departed services
    fn identity_of(&self, service: &Self::Service) -> Result<DeviceIdentity, UsbError>;

    fn open_device(&self, service: Self::Service) -> Result<Self::Device, UsbError>;

    fn set_configuration(&self, device: &Self::Device, value: u8) -> Result<(), UsbError>;

    fn interfaces(
        &self,
        device: &Self::Device,
        request: &InterfaceRequest,
    ) -> Result<Vec<Self::InterfaceService>, UsbError>;

    fn open_interface(
        &self,
        device: &Self::Device,
        service: Self::InterfaceService,
    ) -> Result<Self::Interface, UsbError>;

    fn close_interface(&self, interface: Self::Interface) -> Result<(), UsbError>;

    fn close_device(&self, device: Self::Device) -> Result<(), UsbError>;

    /// Issue one control request; `data` is exactly `setup.length` bytes
    fn control_transfer(
        &self,
        device: &Self::Device,
        setup: &SetupPacket,
        data: &mut [u8],
        timeout: Duration,
    ) -> TransferOutcome;

    /// Number of endpoints of the interface, not counting the control pipe
    fn endpoint_count(&self, interface: &Self::Interface) -> Result<u8, UsbError>;

    /// Properties of pipe `index`; index 0 is the control pipe
    fn pipe_properties(
        &self,
        interface: &Self::Interface,
        index: u8,
    ) -> Result<PipeProperties, UsbError>;

    fn read_pipe(
        &self,
        interface: &Self::Interface,
        pipe: u8,
        buf: &mut [u8],
    ) -> Result<usize, UsbError>;

    fn write_pipe(&self, interface: &Self::Interface, pipe: u8, data: &[u8])
    -> Result<(), UsbError>;

    fn abort_pipe(&self, interface: &Self::Interface, pipe: u8) -> Result<(), UsbError>;

    /// Install a watch and return it with the batch already pending for it
    ///
    /// The pending batch is returned rather than delivered so the caller can
    /// install every watch it needs before processing anything.
    fn watch(
        &self,
        kind: WatchKind,
        filter: MatchFilter,
        callback: WatchCallback<Self::Service>,
    ) -> Result<(Self::Watch, Vec<Self::Service>), UsbError>;
}
