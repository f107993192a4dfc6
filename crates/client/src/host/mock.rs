//! Scripted in-memory host
//!
//! Devices are plain values built with [`MockDevice`]. Every call the client
//! makes is appended to a log so tests can check ordering, and arrivals or
//! departures are fired by hand with [`MockHost::arrive`] and
//! [`MockHost::depart`].

use super::{InterfaceRequest, UsbHost, WatchCallback, WatchKind};
use common::test_utils::{
    create_config_chain, create_language_descriptor, create_mock_device_descriptor,
    create_string_descriptor,
};
use protocol::{
    DescriptorType, DeviceIdentity, Direction, MatchFilter, PipeDirection, PipeProperties,
    SetupPacket, StandardRequest, TransferKind, TransferOutcome, UsbError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Host operation a scripted device refuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailStep {
    Identity,
    OpenDevice,
    SetConfiguration,
    Interfaces,
    OpenInterface,
    CloseInterface,
    Control,
    EndpointCount,
    PipeProperties(u8),
}

/// One recorded host call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    MatchServices(MatchFilter),
    Identity(DeviceIdentity),
    OpenDevice(DeviceIdentity),
    SetConfiguration(DeviceIdentity, u8),
    Interfaces(DeviceIdentity),
    OpenInterface(DeviceIdentity, u8),
    CloseInterface(DeviceIdentity, u8),
    CloseDevice(DeviceIdentity),
    /// `zeroed` is whether the data stage buffer was all zeros on entry
    Control { setup: SetupPacket, zeroed: bool },
    EndpointCount(DeviceIdentity),
    PipeProperties(DeviceIdentity, u8),
    ReadPipe(DeviceIdentity, u8),
    WritePipe(DeviceIdentity, u8, Vec<u8>),
    AbortPipe(DeviceIdentity, u8),
    Watch(WatchKind),
}

/// Scripted device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub identity: DeviceIdentity,
    pub vendor_id: u16,
    pub product_id: u16,
    interfaces: u8,
    endpoints: Vec<PipeProperties>,
    /// Descriptor bytes keyed by GET_DESCRIPTOR wValue
    descriptors: HashMap<u16, Vec<u8>>,
    read_data: HashMap<u8, VecDeque<Vec<u8>>>,
    failures: Vec<FailStep>,
}

fn descriptor_key(descriptor_type: DescriptorType, index: u8) -> u16 {
    ((descriptor_type.code() as u16) << 8) | index as u16
}

impl MockDevice {
    /// Device with one interface holding a bulk IN and a bulk OUT endpoint
    ///
    /// Strings 1, 2 and 3 are "Mock Manufacturer", "Mock Device" and
    /// `SN` followed by the identity in hex.
    pub fn new(identity: u64, vendor_id: u16, product_id: u16) -> Self {
        Self {
            identity: DeviceIdentity(identity),
            vendor_id,
            product_id,
            interfaces: 1,
            endpoints: vec![
                PipeProperties {
                    direction: PipeDirection::In,
                    endpoint: 1,
                    kind: TransferKind::Bulk,
                    max_packet_size: 512,
                    interval: 0,
                },
                PipeProperties {
                    direction: PipeDirection::Out,
                    endpoint: 2,
                    kind: TransferKind::Bulk,
                    max_packet_size: 512,
                    interval: 0,
                },
            ],
            descriptors: HashMap::new(),
            read_data: HashMap::new(),
            failures: Vec::new(),
        }
        .with_descriptor(
            DescriptorType::Device,
            0,
            create_mock_device_descriptor(vendor_id, product_id),
        )
        .with_descriptor(DescriptorType::Config, 0, create_config_chain(1, &[2]))
        .with_descriptor(DescriptorType::String, 0, create_language_descriptor())
        .with_string(1, "Mock Manufacturer")
        .with_string(2, "Mock Device")
        .with_string(3, &format!("SN{:X}", identity))
    }

    pub fn with_failure(mut self, step: FailStep) -> Self {
        self.failures.push(step);
        self
    }

    pub fn with_descriptor(
        mut self,
        descriptor_type: DescriptorType,
        index: u8,
        bytes: Vec<u8>,
    ) -> Self {
        self.descriptors
            .insert(descriptor_key(descriptor_type, index), bytes);
        self
    }

    pub fn without_descriptor(mut self, descriptor_type: DescriptorType, index: u8) -> Self {
        self.descriptors
            .remove(&descriptor_key(descriptor_type, index));
        self
    }

    pub fn with_string(self, index: u8, text: &str) -> Self {
        self.with_descriptor(DescriptorType::String, index, create_string_descriptor(text))
    }

    pub fn with_interfaces(mut self, count: u8) -> Self {
        self.interfaces = count;
        self
    }

    /// Replace the endpoints reported for pipes `1..=n`
    pub fn with_endpoints(mut self, endpoints: Vec<PipeProperties>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Queue one read result for `pipe`
    pub fn with_read_data(mut self, pipe: u8, data: Vec<u8>) -> Self {
        self.read_data.entry(pipe).or_default().push_back(data);
        self
    }

    pub fn filter(&self) -> MatchFilter {
        MatchFilter::new(self.vendor_id, self.product_id)
    }

    fn fails(&self, step: FailStep) -> bool {
        self.failures.contains(&step)
    }

    fn service(&self) -> MockService {
        MockService {
            identity: self.identity,
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            identity_fails: self.fails(FailStep::Identity),
        }
    }
}

/// Unopened reference to a scripted device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockService {
    identity: DeviceIdentity,
    vendor_id: u16,
    product_id: u16,
    identity_fails: bool,
}

#[derive(Debug)]
pub struct MockDeviceHandle {
    identity: DeviceIdentity,
}

#[derive(Debug)]
pub struct MockInterfaceService {
    identity: DeviceIdentity,
    number: u8,
}

#[derive(Debug)]
pub struct MockInterfaceHandle {
    identity: DeviceIdentity,
    number: u8,
}

type SharedCallback = Arc<Mutex<WatchCallback<MockService>>>;

struct WatchEntry {
    id: u64,
    kind: WatchKind,
    filter: MatchFilter,
    callback: SharedCallback,
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    calls: Vec<MockCall>,
    watches: Vec<WatchEntry>,
    next_watch_id: u64,
    pending_departures: Vec<MockService>,
    enumeration_error: Option<UsbError>,
    devices_opened: usize,
    devices_closed: usize,
    interfaces_opened: usize,
    interfaces_closed: usize,
}

impl MockState {
    fn device(&self, identity: DeviceIdentity) -> Option<&MockDevice> {
        self.devices.iter().find(|d| d.identity == identity)
    }

    fn device_mut(&mut self, identity: DeviceIdentity) -> Option<&mut MockDevice> {
        self.devices.iter_mut().find(|d| d.identity == identity)
    }

    fn callbacks(&self, kind: WatchKind, service: &MockService) -> Vec<SharedCallback> {
        self.watches
            .iter()
            .filter(|w| w.kind == kind && w.filter.matches(service.vendor_id, service.product_id))
            .map(|w| Arc::clone(&w.callback))
            .collect()
    }
}

/// Installed mock watch; dropping it uninstalls the callback
pub struct MockWatch {
    state: Arc<Mutex<MockState>>,
    id: u64,
}

impl Drop for MockWatch {
    fn drop(&mut self) {
        let removed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let position = state.watches.iter().position(|w| w.id == self.id);
            position.map(|i| state.watches.remove(i))
        };
        // Callback dropped with the lock released
        drop(removed);
    }
}

/// In-memory host stack
#[derive(Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with `devices` already attached
    pub fn with_devices(devices: impl IntoIterator<Item = MockDevice>) -> Self {
        let host = Self::new();
        host.state().devices.extend(devices);
        host
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `match_services` fail with `error`
    pub fn fail_enumeration(&self, error: UsbError) {
        self.state().enumeration_error = Some(error);
    }

    /// Departure reported as already pending when the departure watch is installed
    pub fn replay_departure(&self, device: &MockDevice) {
        self.state().pending_departures.push(device.service());
    }

    /// Attach one device and notify arrival watches
    pub fn arrive(&self, device: MockDevice) {
        self.arrive_batch(vec![device]);
    }

    /// Attach several devices and deliver them to each arrival watch as one batch
    pub fn arrive_batch(&self, devices: Vec<MockDevice>) {
        let deliveries = {
            let mut state = self.state();
            let services: Vec<MockService> = devices.iter().map(MockDevice::service).collect();
            state.devices.extend(devices);

            state
                .watches
                .iter()
                .filter(|w| w.kind == WatchKind::Arrival)
                .map(|w| {
                    let batch: Vec<MockService> = services
                        .iter()
                        .filter(|s| w.filter.matches(s.vendor_id, s.product_id))
                        .cloned()
                        .collect();
                    (Arc::clone(&w.callback), batch)
                })
                .filter(|(_, batch)| !batch.is_empty())
                .collect::<Vec<_>>()
        };

        for (callback, batch) in deliveries {
            let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
            (&mut **callback)(batch);
        }
    }

    /// Detach a device and notify departure watches
    ///
    /// Returns false when no such device is attached.
    pub fn depart(&self, identity: DeviceIdentity) -> bool {
        let deliveries = {
            let mut state = self.state();
            let Some(position) = state.devices.iter().position(|d| d.identity == identity) else {
                return false;
            };
            let device = state.devices.remove(position);
            let service = device.service();
            state
                .callbacks(WatchKind::Departure, &service)
                .into_iter()
                .map(|cb| (cb, service.clone()))
                .collect::<Vec<_>>()
        };

        for (callback, service) in deliveries {
            let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
            (&mut **callback)(vec![service]);
        }
        true
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Setups of every control transfer with the zeroed-on-entry flag
    pub fn control_calls(&self) -> Vec<(SetupPacket, bool)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Control { setup, zeroed } => Some((*setup, *zeroed)),
                _ => None,
            })
            .collect()
    }

    /// Device handles opened and not yet closed
    pub fn open_devices(&self) -> usize {
        let state = self.state();
        state.devices_opened - state.devices_closed
    }

    /// Interface handles opened and not yet closed
    pub fn open_interfaces(&self) -> usize {
        let state = self.state();
        state.interfaces_opened - state.interfaces_closed
    }

    pub fn watch_count(&self) -> usize {
        self.state().watches.len()
    }

    fn record(&self, call: MockCall) -> MutexGuard<'_, MockState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

impl UsbHost for MockHost {
    type Service = MockService;
    type Device = MockDeviceHandle;
    type InterfaceService = MockInterfaceService;
    type Interface = MockInterfaceHandle;
    type Watch = MockWatch;

    fn match_services(&self, filter: &MatchFilter) -> Result<Vec<Self::Service>, UsbError> {
        let state = self.record(MockCall::MatchServices(*filter));
        if let Some(error) = &state.enumeration_error {
            return Err(error.clone());
        }

        Ok(state
            .devices
            .iter()
            .filter(|d| filter.matches(d.vendor_id, d.product_id))
            .map(MockDevice::service)
            .collect())
    }

    fn identity_of(&self, service: &Self::Service) -> Result<DeviceIdentity, UsbError> {
        let _state = self.record(MockCall::Identity(service.identity));
        if service.identity_fails {
            return Err(UsbError::NotFound);
        }
        Ok(service.identity)
    }

    fn open_device(&self, service: Self::Service) -> Result<Self::Device, UsbError> {
        let mut state = self.record(MockCall::OpenDevice(service.identity));
        let device = state.device(service.identity).ok_or(UsbError::NoDevice)?;
        if device.fails(FailStep::OpenDevice) {
            return Err(UsbError::Access);
        }

        state.devices_opened += 1;
        Ok(MockDeviceHandle {
            identity: service.identity,
        })
    }

    fn set_configuration(&self, device: &Self::Device, value: u8) -> Result<(), UsbError> {
        let state = self.record(MockCall::SetConfiguration(device.identity, value));
        let device = state.device(device.identity).ok_or(UsbError::NoDevice)?;
        if device.fails(FailStep::SetConfiguration) {
            return Err(UsbError::Busy);
        }
        Ok(())
    }

    fn interfaces(
        &self,
        device: &Self::Device,
        _request: &InterfaceRequest,
    ) -> Result<Vec<Self::InterfaceService>, UsbError> {
        let state = self.record(MockCall::Interfaces(device.identity));
        let scripted = state.device(device.identity).ok_or(UsbError::NoDevice)?;
        if scripted.fails(FailStep::Interfaces) {
            return Err(UsbError::Io);
        }

        Ok((0..scripted.interfaces)
            .map(|number| MockInterfaceService {
                identity: device.identity,
                number,
            })
            .collect())
    }

    fn open_interface(
        &self,
        device: &Self::Device,
        service: Self::InterfaceService,
    ) -> Result<Self::Interface, UsbError> {
        let mut state = self.record(MockCall::OpenInterface(device.identity, service.number));
        let scripted = state.device(device.identity).ok_or(UsbError::NoDevice)?;
        if scripted.fails(FailStep::OpenInterface) {
            return Err(UsbError::Busy);
        }

        state.interfaces_opened += 1;
        Ok(MockInterfaceHandle {
            identity: service.identity,
            number: service.number,
        })
    }

    fn close_interface(&self, interface: Self::Interface) -> Result<(), UsbError> {
        let mut state = self.record(MockCall::CloseInterface(
            interface.identity,
            interface.number,
        ));
        state.interfaces_closed += 1;

        match state.device(interface.identity) {
            Some(device) if device.fails(FailStep::CloseInterface) => Err(UsbError::Io),
            _ => Ok(()),
        }
    }

    fn close_device(&self, device: Self::Device) -> Result<(), UsbError> {
        let mut state = self.record(MockCall::CloseDevice(device.identity));
        state.devices_closed += 1;
        Ok(())
    }

    fn control_transfer(
        &self,
        device: &Self::Device,
        setup: &SetupPacket,
        data: &mut [u8],
        _timeout: Duration,
    ) -> TransferOutcome {
        let zeroed = data.iter().all(|&b| b == 0);
        let state = self.record(MockCall::Control {
            setup: *setup,
            zeroed,
        });

        let Some(scripted) = state.device(device.identity) else {
            return TransferOutcome::failed(UsbError::NoDevice);
        };
        if scripted.fails(FailStep::Control) {
            return TransferOutcome::failed(UsbError::Pipe);
        }

        match setup.request_type.direction() {
            Direction::ToDevice => TransferOutcome::success(data.len()),
            Direction::ToHost if setup.request == u8::from(StandardRequest::GetDescriptor) => {
                match scripted.descriptors.get(&setup.value) {
                    Some(bytes) => {
                        let n = bytes.len().min(data.len());
                        data[..n].copy_from_slice(&bytes[..n]);
                        TransferOutcome::success(n)
                    }
                    None => TransferOutcome::failed(UsbError::Pipe),
                }
            }
            Direction::ToHost => TransferOutcome::failed(UsbError::Pipe),
        }
    }

    fn endpoint_count(&self, interface: &Self::Interface) -> Result<u8, UsbError> {
        let state = self.record(MockCall::EndpointCount(interface.identity));
        let device = state.device(interface.identity).ok_or(UsbError::NoDevice)?;
        if device.fails(FailStep::EndpointCount) {
            return Err(UsbError::Io);
        }
        u8::try_from(device.endpoints.len()).map_err(|_| UsbError::Overflow)
    }

    fn pipe_properties(
        &self,
        interface: &Self::Interface,
        index: u8,
    ) -> Result<PipeProperties, UsbError> {
        let state = self.record(MockCall::PipeProperties(interface.identity, index));
        let device = state.device(interface.identity).ok_or(UsbError::NoDevice)?;
        if device.fails(FailStep::PipeProperties(index)) {
            return Err(UsbError::Pipe);
        }

        match index {
            0 => Ok(PipeProperties {
                direction: PipeDirection::Any,
                endpoint: 0,
                kind: TransferKind::Control,
                max_packet_size: 64,
                interval: 0,
            }),
            n => device
                .endpoints
                .get(n as usize - 1)
                .copied()
                .ok_or(UsbError::NotFound),
        }
    }

    fn read_pipe(
        &self,
        interface: &Self::Interface,
        pipe: u8,
        buf: &mut [u8],
    ) -> Result<usize, UsbError> {
        let mut state = self.record(MockCall::ReadPipe(interface.identity, pipe));
        let device = state
            .device_mut(interface.identity)
            .ok_or(UsbError::NoDevice)?;

        let chunk = device
            .read_data
            .get_mut(&pipe)
            .and_then(VecDeque::pop_front)
            .ok_or(UsbError::Timeout)?;
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn write_pipe(
        &self,
        interface: &Self::Interface,
        pipe: u8,
        data: &[u8],
    ) -> Result<(), UsbError> {
        let state = self.record(MockCall::WritePipe(interface.identity, pipe, data.to_vec()));
        state
            .device(interface.identity)
            .map(|_| ())
            .ok_or(UsbError::NoDevice)
    }

    fn abort_pipe(&self, interface: &Self::Interface, pipe: u8) -> Result<(), UsbError> {
        let state = self.record(MockCall::AbortPipe(interface.identity, pipe));
        state
            .device(interface.identity)
            .map(|_| ())
            .ok_or(UsbError::NoDevice)
    }

    fn watch(
        &self,
        kind: WatchKind,
        filter: MatchFilter,
        callback: WatchCallback<Self::Service>,
    ) -> Result<(Self::Watch, Vec<Self::Service>), UsbError> {
        let mut state = self.record(MockCall::Watch(kind));
        let id = state.next_watch_id;
        state.next_watch_id += 1;
        state.watches.push(WatchEntry {
            id,
            kind,
            filter,
            callback: Arc::new(Mutex::new(callback)),
        });

        let pending = match kind {
            WatchKind::Arrival => state
                .devices
                .iter()
                .filter(|d| filter.matches(d.vendor_id, d.product_id))
                .map(MockDevice::service)
                .collect(),
            WatchKind::Departure => {
                let pending = std::mem::take(&mut state.pending_departures);
                let (matching, rest): (Vec<MockService>, Vec<MockService>) = pending
                    .into_iter()
                    .partition(|s| filter.matches(s.vendor_id, s.product_id));
                state.pending_departures = rest;
                matching
            }
        };

        Ok((
            MockWatch {
                state: Arc::clone(&self.state),
                id,
            },
            pending,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_services_filters() {
        let host = MockHost::with_devices([
            MockDevice::new(1, 0x05ac, 0x1281),
            MockDevice::new(2, 0x1234, 0x5678),
        ]);

        let services = host
            .match_services(&MatchFilter::new(0x05ac, 0x1281))
            .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(host.identity_of(&services[0]).unwrap(), DeviceIdentity(1));
    }

    #[test]
    fn test_descriptor_lookup() {
        let host = MockHost::with_devices([MockDevice::new(7, 0x05ac, 0x1281)]);
        let service = host
            .match_services(&MatchFilter::new(0x05ac, 0x1281))
            .unwrap()
            .remove(0);
        let device = host.open_device(service).unwrap();

        let setup = SetupPacket::get_descriptor(DescriptorType::Device, 0, 18);
        let mut buf = [0u8; 18];
        let outcome = host.control_transfer(&device, &setup, &mut buf, Duration::from_millis(6));

        assert_eq!(outcome, TransferOutcome::success(18));
        assert_eq!(&buf[8..12], &[0xac, 0x05, 0x81, 0x12]);
        assert_eq!(host.open_devices(), 1);
    }

    #[test]
    fn test_dropping_watch_uninstalls() {
        let host = MockHost::new();
        let (watch, pending) = host
            .watch(
                WatchKind::Arrival,
                MatchFilter::new(1, 2),
                Box::new(|_services| {}),
            )
            .unwrap();

        assert!(pending.is_empty());
        assert_eq!(host.watch_count(), 1);
        drop(watch);
        assert_eq!(host.watch_count(), 0);
    }

    #[test]
    fn test_arrival_fires_matching_watch_only() {
        let host = MockHost::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (_watch, _) = host
            .watch(
                WatchKind::Arrival,
                MatchFilter::new(0x05ac, 0x1281),
                Box::new(move |services| sink.lock().unwrap().extend(services)),
            )
            .unwrap();

        host.arrive(MockDevice::new(1, 0x05ac, 0x1281));
        host.arrive(MockDevice::new(2, 0xdead, 0xbeef));

        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
