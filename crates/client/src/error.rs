//! Client error types
//!
//! Each layer reports its own enum so callers can tell a failed open step
//! from a failed transfer. Host status codes travel inside as [`UsbError`].

use crate::connection::ConnectionState;
use protocol::{DecodeError, UsbError};
use thiserror::Error;

/// Failures of the connection open sequence
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Failed to enumerate matching devices: {0}")]
    Enumerate(UsbError),

    #[error("No device matching {vendor_id:04x}:{product_id:04x}")]
    NoDevice { vendor_id: u16, product_id: u16 },

    #[error("Failed to read device identity: {0}")]
    Identity(UsbError),

    #[error("Failed to open device: {0}")]
    OpenDevice(UsbError),

    #[error("Failed to set configuration: {0}")]
    SetConfiguration(UsbError),

    #[error("Failed to iterate interfaces: {0}")]
    InterfaceIterator(UsbError),

    #[error("No interface at index {index}")]
    NoInterface { index: usize },

    #[error("Failed to open interface: {0}")]
    OpenInterface(UsbError),

    #[error("Connection is {state}, expected empty")]
    InvalidState { state: ConnectionState },
}

/// Failures of control transfers, pipe I/O and descriptor helpers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("Transfer failed: {0}")]
    Status(#[from] UsbError),

    #[error("Connection is not open")]
    NotOpen,

    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("Descriptor decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Failures while listing the pipes of the open interface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipeEnumerationError {
    #[error("Failed to read endpoint count: {0}")]
    EndpointCount(UsbError),

    #[error("Failed to read properties of pipe {index}: {source}")]
    Pipe {
        index: u8,
        #[source]
        source: UsbError,
    },

    #[error("Connection is not open")]
    NotOpen,
}
