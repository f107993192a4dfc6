//! Connection lifecycle tests against the mock host
//!
//! Run with: `cargo test -p client --test connection_tests`

use client::{
    Connection, ConnectionError, ConnectionState, FailStep, MockCall, MockDevice, MockHost,
};
use protocol::{DeviceIdentity, MatchFilter, UsbError};

const VID: u16 = 0x05ac;
const PID: u16 = 0x1281;

fn id(n: u64) -> DeviceIdentity {
    DeviceIdentity(n)
}

// ============================================================================
// Connect
// ============================================================================

#[test]
fn test_no_match_leaves_connection_empty() {
    let host = MockHost::with_devices([MockDevice::new(1, 0x1234, 0x5678)]);
    let mut conn = Connection::new(host.clone());

    let err = conn.connect(VID, PID).unwrap_err();

    assert_eq!(
        err,
        ConnectionError::NoDevice {
            vendor_id: VID,
            product_id: PID
        }
    );
    assert_eq!(conn.state(), ConnectionState::Empty);
    assert!(conn.identity().is_none());
    assert_eq!(
        host.calls(),
        vec![MockCall::MatchServices(MatchFilter::new(VID, PID))]
    );
}

#[test]
fn test_enumeration_failure() {
    let host = MockHost::with_devices([MockDevice::new(1, VID, PID)]);
    host.fail_enumeration(UsbError::Io);
    let mut conn = Connection::new(host);

    assert_eq!(
        conn.connect(VID, PID),
        Err(ConnectionError::Enumerate(UsbError::Io))
    );
    assert_eq!(conn.state(), ConnectionState::Empty);
}

#[test]
fn test_open_sequence_order() {
    let host = MockHost::with_devices([MockDevice::new(1, VID, PID)]);
    let mut conn = Connection::new(host.clone());

    conn.connect(VID, PID).unwrap();

    assert_eq!(conn.state(), ConnectionState::Open);
    assert!(conn.is_open());
    assert_eq!(conn.identity(), Some(id(1)));
    assert_eq!(
        host.calls(),
        vec![
            MockCall::MatchServices(MatchFilter::new(VID, PID)),
            MockCall::Identity(id(1)),
            MockCall::OpenDevice(id(1)),
            MockCall::SetConfiguration(id(1), 1),
            MockCall::Interfaces(id(1)),
            MockCall::OpenInterface(id(1), 0),
        ]
    );
    assert_eq!(host.open_devices(), 1);
    assert_eq!(host.open_interfaces(), 1);
}

#[test]
fn test_failover_to_next_candidate() {
    let host = MockHost::with_devices([
        MockDevice::new(1, VID, PID).with_failure(FailStep::OpenDevice),
        MockDevice::new(2, VID, PID),
    ]);
    let mut conn = Connection::new(host.clone());

    conn.connect(VID, PID).unwrap();

    assert_eq!(conn.identity(), Some(id(2)));
    assert_eq!(host.open_devices(), 1);
    assert!(!host.calls().contains(&MockCall::OpenInterface(id(1), 0)));
}

#[test]
fn test_last_candidate_error_is_returned() {
    let host = MockHost::with_devices([
        MockDevice::new(1, VID, PID).with_failure(FailStep::OpenDevice),
        MockDevice::new(2, VID, PID).with_failure(FailStep::SetConfiguration),
    ]);
    let mut conn = Connection::new(host.clone());

    let err = conn.connect(VID, PID).unwrap_err();

    assert_eq!(err, ConnectionError::SetConfiguration(UsbError::Busy));
    assert_eq!(conn.state(), ConnectionState::Empty);
    // Device 2 was opened before set_configuration failed and must be released
    assert_eq!(host.open_devices(), 0);
    assert!(host.calls().contains(&MockCall::CloseDevice(id(2))));
}

#[test]
fn test_identity_is_read_before_open() {
    let host = MockHost::with_devices([MockDevice::new(1, VID, PID).with_failure(FailStep::Identity)]);
    let mut conn = Connection::new(host.clone());

    let err = conn.connect(VID, PID).unwrap_err();

    assert_eq!(err, ConnectionError::Identity(UsbError::NotFound));
    assert!(!host.calls().contains(&MockCall::OpenDevice(id(1))));
}

#[test]
fn test_interface_iterator_failure() {
    let host =
        MockHost::with_devices([MockDevice::new(1, VID, PID).with_failure(FailStep::Interfaces)]);
    let mut conn = Connection::new(host.clone());

    assert_eq!(
        conn.connect(VID, PID),
        Err(ConnectionError::InterfaceIterator(UsbError::Io))
    );
    assert_eq!(host.open_devices(), 0);
}

// ============================================================================
// Interface selection
// ============================================================================

#[test]
fn test_connect_interface_by_index() {
    let host = MockHost::with_devices([MockDevice::new(1, VID, PID).with_interfaces(3)]);
    let mut conn = Connection::new(host.clone());

    conn.connect_interface(VID, PID, 2).unwrap();

    assert!(host.calls().contains(&MockCall::OpenInterface(id(1), 2)));
    assert_eq!(host.open_interfaces(), 1);
}

#[test]
fn test_interface_index_out_of_range() {
    let host = MockHost::with_devices([MockDevice::new(1, VID, PID).with_interfaces(3)]);
    let mut conn = Connection::new(host.clone());

    let err = conn.connect_interface(VID, PID, 3).unwrap_err();

    assert_eq!(err, ConnectionError::NoInterface { index: 3 });
    assert_eq!(conn.state(), ConnectionState::Empty);
    assert_eq!(host.open_devices(), 0);
}

#[test]
fn test_open_service_directly() {
    use client::UsbHost;

    let host = MockHost::with_devices([MockDevice::new(4, VID, PID)]);
    let service = host
        .match_services(&MatchFilter::new(VID, PID))
        .unwrap()
        .remove(0);
    let mut conn = Connection::new(host.clone());

    conn.open_service(service).unwrap();

    assert_eq!(conn.identity(), Some(id(4)));
    assert_eq!(host.open_interfaces(), 1);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_close_releases_interface_then_device() {
    let host = MockHost::with_devices([MockDevice::new(1, VID, PID)]);
    let mut conn = Connection::new(host.clone());
    conn.connect(VID, PID).unwrap();
    host.clear_calls();

    conn.close();

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(
        host.calls(),
        vec![MockCall::CloseInterface(id(1), 0), MockCall::CloseDevice(id(1))]
    );

    // Second close does nothing
    conn.close();
    assert_eq!(host.calls().len(), 2);
    assert_eq!(host.open_devices(), 0);
    assert_eq!(host.open_interfaces(), 0);
}

#[test]
fn test_interface_close_failure_still_closes_device() {
    let host = MockHost::with_devices([
        MockDevice::new(1, VID, PID).with_failure(FailStep::CloseInterface)
    ]);
    let mut conn = Connection::new(host.clone());
    conn.connect(VID, PID).unwrap();

    conn.close();

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(host.open_devices(), 0);
}

#[test]
fn test_drop_closes_connection() {
    let host = MockHost::with_devices([MockDevice::new(1, VID, PID)]);
    {
        let mut conn = Connection::new(host.clone());
        conn.connect(VID, PID).unwrap();
        assert_eq!(host.open_devices(), 1);
    }

    assert_eq!(host.open_devices(), 0);
    assert_eq!(host.open_interfaces(), 0);
}

#[test]
fn test_closed_connection_cannot_reconnect() {
    let host = MockHost::with_devices([MockDevice::new(1, VID, PID)]);
    let mut conn = Connection::new(host.clone());
    conn.connect(VID, PID).unwrap();
    conn.close();
    host.clear_calls();

    let err = conn.connect(VID, PID).unwrap_err();

    assert_eq!(
        err,
        ConnectionError::InvalidState {
            state: ConnectionState::Closed
        }
    );
    assert!(host.calls().is_empty());
}
