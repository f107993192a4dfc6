//! USB descriptor and request codec for simple-usb
//!
//! This crate holds the pure, host-independent half of the client: the byte
//! layouts of device, configuration, interface, endpoint and string
//! descriptors, the GET_DESCRIPTOR setup packet, and the value types
//! (identities, filters, outcomes, pipe properties) shared with the host
//! backends. Nothing here performs I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{Configuration, DescriptorType, SetupPacket};
//!
//! let setup = SetupPacket::get_descriptor(DescriptorType::Config, 0, 512);
//! assert_eq!(setup.to_bytes()[..4], [0x80, 0x06, 0x00, 0x02]);
//!
//! // One configuration, zero interfaces
//! let bytes = [0x09, 0x02, 0x09, 0x00, 0x00, 0x01, 0x00, 0x80, 0x32];
//! let config = Configuration::parse(&bytes).unwrap();
//! assert!(config.interfaces.is_empty());
//! ```
//!
//! # Strings
//!
//! ```
//! use protocol::StringDescriptor;
//!
//! let raw = [0x0a, 0x03, b'A', 0, b'B', 0, b'C', 0, b'D', 0];
//! let mut out = [0u8; 16];
//! let count = StringDescriptor::new(&raw).unwrap().decode_into(&mut out).unwrap();
//! assert_eq!(&out[..count], b"ABC\0");
//! ```

pub mod descriptor;
pub mod error;
pub mod request;
pub mod string;
pub mod types;

pub use descriptor::{
    CONFIG_DESCRIPTOR_LEN, ConfigDescriptor, Configuration, DEVICE_DESCRIPTOR_LEN,
    DescriptorType, DeviceDescriptor, ENDPOINT_DESCRIPTOR_LEN, EndpointDescriptor,
    INTERFACE_DESCRIPTOR_LEN, Interface, InterfaceDescriptor,
};
pub use error::{DecodeError, Result};
pub use request::{
    Direction, LANGID_US_ENGLISH, Recipient, RequestKind, RequestType, SETUP_PACKET_LEN,
    SetupPacket, StandardRequest,
};
pub use string::{STRING_DESCRIPTOR_BUFFER_LEN, StringDescriptor, encode_string_descriptor};
pub use types::{
    DeviceIdentity, MatchFilter, PipeDirection, PipeProperties, TransferKind, TransferOutcome,
    TransferStatus, UsbError,
};
