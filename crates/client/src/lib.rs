//! Host-side USB client
//!
//! Locate a device by vendor and product id, hold its device and interface
//! handles, fetch and decode descriptors through control transfers, move data
//! over bulk and interrupt pipes, and react to devices arriving and
//! departing.
//!
//! The host USB stack is reached through the [`UsbHost`] trait. [`RusbHost`]
//! drives libusb; [`MockHost`] runs scripted devices in memory.
//!
//! # Example
//!
//! ```
//! use client::{Connection, MockDevice, MockHost};
//!
//! let host = MockHost::with_devices([MockDevice::new(1, 0x05ac, 0x1281)]);
//! let mut conn = Connection::new(host);
//! conn.connect(0x05ac, 0x1281).unwrap();
//!
//! let device = conn.device_descriptor().unwrap();
//! assert_eq!(device.vendor_id, 0x05ac);
//! assert_eq!(conn.serial_number().unwrap().as_deref(), Some("SN1"));
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod observer;
pub mod pipe;
pub mod transfer;

pub use connection::{Connection, ConnectionState, DEFAULT_CONFIGURATION};
pub use dispatcher::Dispatcher;
pub use error::{ConnectionError, PipeEnumerationError, TransferError};
pub use host::{
    FailStep, InterfaceRequest, MockCall, MockDevice, MockHost, RusbHost, UsbHost, WatchCallback,
    WatchKind,
};
pub use observer::{DeviceObserver, FnObserver, observer_fn};
pub use transfer::{CONTROL_TIMEOUT, SCRATCH_LEN, TransferTrace};
