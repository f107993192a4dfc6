//! libusb backend
//!
//! Services are `rusb::Device`s whose device descriptor passes the filter.
//! Opening the interface claims it (detaching a kernel driver first when one
//! is bound) and snapshots the endpoints of alternate setting 0, so pipe
//! numbering stays fixed while the interface is open.
//!
//! Hotplug callbacks run inside [`RusbHost::handle_events`] on the calling
//! thread.

use super::{InterfaceRequest, UsbHost, WatchCallback, WatchKind};
use protocol::{
    DeviceIdentity, Direction, InterfaceDescriptor, MatchFilter, PipeDirection, PipeProperties,
    SetupPacket, TransferKind, TransferOutcome, UsbError,
};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Completion timeout of bulk and interrupt pipe I/O
const PIPE_TIMEOUT: Duration = Duration::from_secs(1);

/// Host stack backed by a libusb context
#[derive(Clone)]
pub struct RusbHost {
    context: Context,
}

/// Open device
pub struct RusbDevice {
    handle: Arc<DeviceHandle<Context>>,
    control_max_packet: u8,
}

/// Interface of an open device that has not been claimed yet
pub struct RusbInterfaceService {
    number: u8,
    endpoints: Vec<PipeProperties>,
}

/// Claimed interface
pub struct RusbInterface {
    handle: Arc<DeviceHandle<Context>>,
    number: u8,
    control_max_packet: u8,
    endpoints: Vec<PipeProperties>,
    reattach_kernel_driver: bool,
}

impl RusbHost {
    pub fn new() -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }

    /// Whether this libusb build can deliver arrival and departure events
    pub fn has_hotplug() -> bool {
        rusb::has_hotplug()
    }

    /// Pump pending libusb events, running watch callbacks on this thread
    pub fn handle_events(&self, timeout: Option<Duration>) -> Result<(), UsbError> {
        match self.context.handle_events(timeout) {
            Ok(()) | Err(rusb::Error::Interrupted) => Ok(()),
            Err(e) => Err(map_rusb_error(e)),
        }
    }

    fn identity(device: &Device<Context>) -> DeviceIdentity {
        DeviceIdentity(((device.bus_number() as u64) << 8) | device.address() as u64)
    }
}

impl RusbInterface {
    fn endpoint(&self, pipe: u8) -> Result<&PipeProperties, UsbError> {
        match pipe {
            0 => Err(UsbError::InvalidParam),
            n => self
                .endpoints
                .get(n as usize - 1)
                .ok_or(UsbError::NotFound),
        }
    }
}

fn endpoint_address(props: &PipeProperties) -> u8 {
    match props.direction {
        PipeDirection::In => props.endpoint | 0x80,
        _ => props.endpoint,
    }
}

fn pipe_properties_of(endpoint: &rusb::EndpointDescriptor<'_>) -> PipeProperties {
    PipeProperties {
        direction: match endpoint.direction() {
            rusb::Direction::In => PipeDirection::In,
            rusb::Direction::Out => PipeDirection::Out,
        },
        endpoint: endpoint.number(),
        kind: match endpoint.transfer_type() {
            rusb::TransferType::Control => TransferKind::Control,
            rusb::TransferType::Isochronous => TransferKind::Isochronous,
            rusb::TransferType::Bulk => TransferKind::Bulk,
            rusb::TransferType::Interrupt => TransferKind::Interrupt,
        },
        max_packet_size: endpoint.max_packet_size(),
        interval: endpoint.interval(),
    }
}

impl UsbHost for RusbHost {
    type Service = Device<Context>;
    type Device = RusbDevice;
    type InterfaceService = RusbInterfaceService;
    type Interface = RusbInterface;
    type Watch = Registration<Context>;

    fn match_services(&self, filter: &MatchFilter) -> Result<Vec<Self::Service>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        let matched: Vec<_> = devices
            .iter()
            .filter(|device| match device.device_descriptor() {
                Ok(desc) => filter.matches(desc.vendor_id(), desc.product_id()),
                Err(e) => {
                    debug!(
                        "Skipping device bus={} addr={}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    false
                }
            })
            .collect();

        debug!("{} device(s) match {}", matched.len(), filter);
        Ok(matched)
    }

    fn identity_of(&self, service: &Self::Service) -> Result<DeviceIdentity, UsbError> {
        Ok(Self::identity(service))
    }

    fn open_device(&self, service: Self::Service) -> Result<Self::Device, UsbError> {
        let control_max_packet = service
            .device_descriptor()
            .map_err(map_rusb_error)?
            .max_packet_size();
        let handle = service.open().map_err(map_rusb_error)?;

        debug!("Opened device {}", Self::identity(&service));
        Ok(RusbDevice {
            handle: Arc::new(handle),
            control_max_packet,
        })
    }

    fn set_configuration(&self, device: &Self::Device, value: u8) -> Result<(), UsbError> {
        // Reselecting the active configuration resets every interface
        if matches!(device.handle.active_configuration(), Ok(active) if active == value) {
            return Ok(());
        }
        device
            .handle
            .set_active_configuration(value)
            .map_err(map_rusb_error)
    }

    fn interfaces(
        &self,
        device: &Self::Device,
        request: &InterfaceRequest,
    ) -> Result<Vec<Self::InterfaceService>, UsbError> {
        let config = device
            .handle
            .device()
            .active_config_descriptor()
            .map_err(map_rusb_error)?;

        let mut services = Vec::new();
        for interface in config.interfaces() {
            for alt in interface.descriptors() {
                let descriptor = InterfaceDescriptor {
                    length: protocol::INTERFACE_DESCRIPTOR_LEN as u8,
                    descriptor_type: 0x04,
                    interface_number: alt.interface_number(),
                    alternate_setting: alt.setting_number(),
                    num_endpoints: alt.num_endpoints(),
                    class: alt.class_code(),
                    subclass: alt.sub_class_code(),
                    protocol: alt.protocol_code(),
                    interface_index: alt.description_string_index().unwrap_or(0),
                };
                if !request.matches(&descriptor) {
                    continue;
                }
                // Pipes always describe alternate setting 0
                if request.alternate_setting.is_none() && alt.setting_number() != 0 {
                    continue;
                }

                services.push(RusbInterfaceService {
                    number: alt.interface_number(),
                    endpoints: alt
                        .endpoint_descriptors()
                        .map(|ep| pipe_properties_of(&ep))
                        .collect(),
                });
            }
        }

        Ok(services)
    }

    fn open_interface(
        &self,
        device: &Self::Device,
        service: Self::InterfaceService,
    ) -> Result<Self::Interface, UsbError> {
        let number = service.number;
        let handle = &device.handle;

        let reattach_kernel_driver = match handle.kernel_driver_active(number) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", number);
                handle.detach_kernel_driver(number).map_err(map_rusb_error)?;
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    number, e
                );
                false
            }
        };

        if let Err(e) = handle.claim_interface(number) {
            warn!("Failed to claim interface {}: {}", number, e);
            if reattach_kernel_driver {
                let _ = handle.attach_kernel_driver(number);
            }
            return Err(map_rusb_error(e));
        }

        debug!("Claimed interface {}", number);
        Ok(RusbInterface {
            handle: Arc::clone(handle),
            number,
            control_max_packet: device.control_max_packet,
            endpoints: service.endpoints,
            reattach_kernel_driver,
        })
    }

    fn close_interface(&self, interface: Self::Interface) -> Result<(), UsbError> {
        let result = interface
            .handle
            .release_interface(interface.number)
            .map_err(map_rusb_error);

        if interface.reattach_kernel_driver
            && let Err(e) = interface.handle.attach_kernel_driver(interface.number)
        {
            warn!(
                "Failed to reattach kernel driver to interface {}: {}",
                interface.number, e
            );
        }

        result
    }

    fn close_device(&self, device: Self::Device) -> Result<(), UsbError> {
        // libusb closes the handle when the last reference goes away
        drop(device);
        Ok(())
    }

    fn control_transfer(
        &self,
        device: &Self::Device,
        setup: &SetupPacket,
        data: &mut [u8],
        timeout: Duration,
    ) -> TransferOutcome {
        let request_type = setup.request_type.0;
        let result = match setup.request_type.direction() {
            Direction::ToHost => device.handle.read_control(
                request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            ),
            Direction::ToDevice => device.handle.write_control(
                request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            ),
        };

        match result {
            Ok(length) => TransferOutcome::success(length),
            Err(e) => TransferOutcome::failed(map_rusb_error(e)),
        }
    }

    fn endpoint_count(&self, interface: &Self::Interface) -> Result<u8, UsbError> {
        u8::try_from(interface.endpoints.len()).map_err(|_| UsbError::Overflow)
    }

    fn pipe_properties(
        &self,
        interface: &Self::Interface,
        index: u8,
    ) -> Result<PipeProperties, UsbError> {
        if index == 0 {
            return Ok(PipeProperties {
                direction: PipeDirection::Any,
                endpoint: 0,
                kind: TransferKind::Control,
                max_packet_size: interface.control_max_packet as u16,
                interval: 0,
            });
        }
        interface.endpoint(index).copied()
    }

    fn read_pipe(
        &self,
        interface: &Self::Interface,
        pipe: u8,
        buf: &mut [u8],
    ) -> Result<usize, UsbError> {
        let props = interface.endpoint(pipe)?;
        if props.direction != PipeDirection::In {
            return Err(UsbError::InvalidParam);
        }

        let address = endpoint_address(props);
        let result = match props.kind {
            TransferKind::Bulk => interface.handle.read_bulk(address, buf, PIPE_TIMEOUT),
            TransferKind::Interrupt => interface.handle.read_interrupt(address, buf, PIPE_TIMEOUT),
            _ => return Err(UsbError::NotSupported),
        };
        result.map_err(map_rusb_error)
    }

    fn write_pipe(
        &self,
        interface: &Self::Interface,
        pipe: u8,
        data: &[u8],
    ) -> Result<(), UsbError> {
        let props = interface.endpoint(pipe)?;
        if props.direction != PipeDirection::Out {
            return Err(UsbError::InvalidParam);
        }

        let address = endpoint_address(props);
        let written = match props.kind {
            TransferKind::Bulk => interface.handle.write_bulk(address, data, PIPE_TIMEOUT),
            TransferKind::Interrupt => interface.handle.write_interrupt(address, data, PIPE_TIMEOUT),
            _ => return Err(UsbError::NotSupported),
        }
        .map_err(map_rusb_error)?;

        if written != data.len() {
            return Err(UsbError::Other {
                message: format!("short write: {} of {} bytes", written, data.len()),
            });
        }
        Ok(())
    }

    /// Clear a halted endpoint
    ///
    /// Synchronous libusb transfers cannot be cancelled from another call, so
    /// nothing in flight is aborted here: a pending read or write ends when
    /// [`PIPE_TIMEOUT`] expires. Clearing the halt only resets the endpoint
    /// for the next transfer.
    fn abort_pipe(&self, interface: &Self::Interface, pipe: u8) -> Result<(), UsbError> {
        let props = interface.endpoint(pipe)?;
        interface
            .handle
            .clear_halt(endpoint_address(props))
            .map_err(map_rusb_error)
    }

    fn watch(
        &self,
        kind: WatchKind,
        filter: MatchFilter,
        callback: WatchCallback<Self::Service>,
    ) -> Result<(Self::Watch, Vec<Self::Service>), UsbError> {
        if !Self::has_hotplug() {
            return Err(UsbError::NotSupported);
        }

        let mut builder = HotplugBuilder::new();
        builder
            .vendor_id(filter.vendor_id)
            .product_id(filter.product_id)
            .enumerate(false);
        let replayed = Arc::new(Mutex::new(ReplayedArrivals::default()));
        let forwarder: Box<dyn Hotplug<Context>> = Box::new(HotplugForwarder {
            kind,
            callback,
            replayed: Arc::clone(&replayed),
        });
        let registration = builder
            .register(&self.context, forwarder)
            .map_err(map_rusb_error)?;

        // Devices already attached stand in for the replayed arrivals
        let pending = match kind {
            WatchKind::Arrival => {
                let services = self.match_services(&filter)?;
                let mut replayed = replayed.lock().unwrap_or_else(PoisonError::into_inner);
                for service in &services {
                    replayed.record(Self::identity(service));
                }
                services
            }
            WatchKind::Departure => Vec::new(),
        };

        debug!("Installed {:?} watch for {}", kind, filter);
        Ok((registration, pending))
    }
}

/// Identities delivered in an arrival watch's initial batch
///
/// A device attached after the hotplug callback is registered but before the
/// attached devices are listed shows up in both. The hotplug copy is dropped
/// once; a departure clears the entry so a later device reusing the same bus
/// address is delivered.
#[derive(Debug, Default)]
struct ReplayedArrivals {
    identities: HashSet<DeviceIdentity>,
}

impl ReplayedArrivals {
    fn record(&mut self, identity: DeviceIdentity) {
        self.identities.insert(identity);
    }

    /// Whether a hotplug arrival repeats the initial batch
    fn is_duplicate(&mut self, identity: DeviceIdentity) -> bool {
        self.identities.remove(&identity)
    }

    fn forget(&mut self, identity: DeviceIdentity) {
        self.identities.remove(&identity);
    }
}

/// Forwards one kind of hotplug event to a watch callback
struct HotplugForwarder {
    kind: WatchKind,
    callback: WatchCallback<Device<Context>>,
    replayed: Arc<Mutex<ReplayedArrivals>>,
}

impl HotplugForwarder {
    fn replayed(&self) -> MutexGuard<'_, ReplayedArrivals> {
        self.replayed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Hotplug<Context> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if self.kind != WatchKind::Arrival {
            return;
        }
        if self.replayed().is_duplicate(RusbHost::identity(&device)) {
            debug!("Arrival already delivered with the initial batch");
            return;
        }
        (self.callback)(vec![device]);
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        match self.kind {
            WatchKind::Arrival => self.replayed().forget(RusbHost::identity(&device)),
            WatchKind::Departure => (self.callback)(vec![device]),
        }
    }
}

/// Map rusb errors to host status codes
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Access), UsbError::Access);
        assert_eq!(
            map_rusb_error(rusb::Error::NotSupported),
            UsbError::NotSupported
        );
        assert!(matches!(
            map_rusb_error(rusb::Error::Other),
            UsbError::Other { .. }
        ));
    }

    #[test]
    fn test_pipe_timeout_is_finite() {
        assert!(!PIPE_TIMEOUT.is_zero());
    }

    #[test]
    fn test_replayed_arrival_is_dropped_once() {
        let mut replayed = ReplayedArrivals::default();
        replayed.record(DeviceIdentity(0x0105));

        assert!(replayed.is_duplicate(DeviceIdentity(0x0105)));
        // The next arrival at that address is a new device
        assert!(!replayed.is_duplicate(DeviceIdentity(0x0105)));
        assert!(!replayed.is_duplicate(DeviceIdentity(0x0106)));
    }

    #[test]
    fn test_departure_clears_replayed_arrival() {
        let mut replayed = ReplayedArrivals::default();
        replayed.record(DeviceIdentity(0x0203));
        replayed.forget(DeviceIdentity(0x0203));

        assert!(!replayed.is_duplicate(DeviceIdentity(0x0203)));
    }

    #[test]
    fn test_endpoint_address() {
        let props = PipeProperties {
            direction: PipeDirection::In,
            endpoint: 2,
            kind: TransferKind::Bulk,
            max_packet_size: 512,
            interval: 0,
        };
        assert_eq!(endpoint_address(&props), 0x82);

        let out = PipeProperties {
            direction: PipeDirection::Out,
            ..props
        };
        assert_eq!(endpoint_address(&out), 0x02);
    }
}
