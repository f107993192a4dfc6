//! Device connection lifecycle
//!
//! A [`Connection`] owns at most one open device and one open interface of
//! that device. Opening walks the same steps for every candidate service:
//!
//! 1. read the device identity
//! 2. open the device
//! 3. select configuration 1
//! 4. enumerate interfaces with a don't-care request and pick one by index
//! 5. open the interface
//!
//! A failing step releases whatever the candidate already opened before the
//! next candidate is tried. Teardown releases the interface, then the device,
//! exactly once.

use crate::error::ConnectionError;
use crate::host::{InterfaceRequest, UsbHost};
use crate::transfer::TransferTrace;
use protocol::{DeviceIdentity, MatchFilter};
use std::fmt;
use tracing::{debug, info, warn};

/// Configuration selected on open
pub const DEFAULT_CONFIGURATION: u8 = 1;

/// Lifecycle state of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No handles held
    Empty,
    /// Open sequence running
    Opening,
    /// Device and interface held
    Open,
    /// Handles released; terminal
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Empty => write!(f, "empty"),
            ConnectionState::Opening => write!(f, "opening"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Open device plus one claimed interface
pub struct Connection<H: UsbHost> {
    pub(crate) host: H,
    pub(crate) state: ConnectionState,
    pub(crate) device: Option<H::Device>,
    pub(crate) interface: Option<H::Interface>,
    pub(crate) identity: Option<DeviceIdentity>,
    pub(crate) trace: Option<Box<dyn TransferTrace + Send>>,
}

impl<H: UsbHost> Connection<H> {
    /// Empty connection bound to a host
    pub fn new(host: H) -> Self {
        Self {
            host,
            state: ConnectionState::Empty,
            device: None,
            interface: None,
            identity: None,
            trace: None,
        }
    }

    /// Install a hook that sees every control transfer
    pub fn with_trace(mut self, trace: impl TransferTrace + Send + 'static) -> Self {
        self.trace = Some(Box::new(trace));
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Identity of the open device
    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Open the first matching device that completes the open sequence
    pub fn connect(&mut self, vendor_id: u16, product_id: u16) -> Result<(), ConnectionError> {
        self.connect_interface(vendor_id, product_id, 0)
    }

    /// Like [`connect`](Self::connect), opening the `interface_index`-th
    /// interface instead of the first
    pub fn connect_interface(
        &mut self,
        vendor_id: u16,
        product_id: u16,
        interface_index: usize,
    ) -> Result<(), ConnectionError> {
        self.expect_empty()?;

        let filter = MatchFilter::new(vendor_id, product_id);
        let services = self
            .host
            .match_services(&filter)
            .map_err(ConnectionError::Enumerate)?;

        debug!("{} candidate(s) for {}", services.len(), filter);

        let mut last_error = None;
        for service in services {
            match self.open_candidate(service, interface_index) {
                Ok(()) => {
                    info!(
                        "Connected to {} (identity {})",
                        filter,
                        self.identity.map(|i| i.to_string()).unwrap_or_default()
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!("Candidate for {} failed: {}", filter, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ConnectionError::NoDevice {
            vendor_id,
            product_id,
        }))
    }

    /// Run the open sequence against one already resolved service
    pub fn open_service(&mut self, service: H::Service) -> Result<(), ConnectionError> {
        self.open_service_interface(service, 0)
    }

    pub fn open_service_interface(
        &mut self,
        service: H::Service,
        interface_index: usize,
    ) -> Result<(), ConnectionError> {
        self.expect_empty()?;
        self.open_candidate(service, interface_index)
    }

    fn expect_empty(&self) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Empty => Ok(()),
            state => Err(ConnectionError::InvalidState { state }),
        }
    }

    fn open_candidate(
        &mut self,
        service: H::Service,
        interface_index: usize,
    ) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Opening;

        match self.open_handles(service, interface_index) {
            Ok((identity, device, interface)) => {
                self.identity = Some(identity);
                self.device = Some(device);
                self.interface = Some(interface);
                self.state = ConnectionState::Open;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Empty;
                Err(e)
            }
        }
    }

    fn open_handles(
        &self,
        service: H::Service,
        interface_index: usize,
    ) -> Result<(DeviceIdentity, H::Device, H::Interface), ConnectionError> {
        let identity = self
            .host
            .identity_of(&service)
            .map_err(ConnectionError::Identity)?;
        let device = self
            .host
            .open_device(service)
            .map_err(ConnectionError::OpenDevice)?;
        debug!("Opened device {}", identity);

        match self.open_interface_on(&device, interface_index) {
            Ok(interface) => Ok((identity, device, interface)),
            Err(e) => {
                if let Err(close_err) = self.host.close_device(device) {
                    warn!("Failed to close device {}: {}", identity, close_err);
                }
                Err(e)
            }
        }
    }

    fn open_interface_on(
        &self,
        device: &H::Device,
        interface_index: usize,
    ) -> Result<H::Interface, ConnectionError> {
        self.host
            .set_configuration(device, DEFAULT_CONFIGURATION)
            .map_err(ConnectionError::SetConfiguration)?;

        let service = self
            .host
            .interfaces(device, &InterfaceRequest::ANY)
            .map_err(ConnectionError::InterfaceIterator)?
            .into_iter()
            .nth(interface_index)
            .ok_or(ConnectionError::NoInterface {
                index: interface_index,
            })?;

        let interface = self
            .host
            .open_interface(device, service)
            .map_err(ConnectionError::OpenInterface)?;
        debug!("Opened interface {}", interface_index);
        Ok(interface)
    }

    /// Release the interface, then the device
    ///
    /// Close failures are logged and otherwise ignored. Calling this more
    /// than once, or on a connection that never opened, does nothing.
    pub fn close(&mut self) {
        if let Some(interface) = self.interface.take()
            && let Err(e) = self.host.close_interface(interface)
        {
            warn!("Failed to close interface: {}", e);
        }

        if let Some(device) = self.device.take()
            && let Err(e) = self.host.close_device(device)
        {
            warn!("Failed to close device: {}", e);
        }

        if self.state == ConnectionState::Open {
            debug!(
                "Closed connection to {}",
                self.identity.map(|i| i.to_string()).unwrap_or_default()
            );
            self.state = ConnectionState::Closed;
        }
    }
}

impl<H: UsbHost> Drop for Connection<H> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<H: UsbHost> fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("identity", &self.identity)
            .field("has_trace", &self.trace.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{FailStep, MockCall, MockDevice, MockHost};

    const VID: u16 = 0x05ac;
    const PID: u16 = 0x1281;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Opening.to_string(), "opening");
    }

    #[test]
    fn test_close_on_empty_is_noop() {
        let host = MockHost::new();
        let mut conn = Connection::new(host.clone());
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Empty);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_interface_failure_releases_device() {
        let host = MockHost::with_devices([
            MockDevice::new(1, VID, PID).with_failure(FailStep::OpenInterface)
        ]);
        let mut conn = Connection::new(host.clone());

        let err = conn.connect(VID, PID).unwrap_err();
        assert!(matches!(err, ConnectionError::OpenInterface(_)));
        assert_eq!(conn.state(), ConnectionState::Empty);
        assert_eq!(host.open_devices(), 0);
        assert!(host.calls().contains(&MockCall::CloseDevice(DeviceIdentity(1))));
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let host = MockHost::with_devices([MockDevice::new(1, VID, PID)]);
        let mut conn = Connection::new(host);
        conn.connect(VID, PID).unwrap();

        let err = conn.connect(VID, PID).unwrap_err();
        assert_eq!(
            err,
            ConnectionError::InvalidState {
                state: ConnectionState::Open
            }
        );
    }
}
