//! USB value types shared by the codec and the client
//!
//! This module defines the identifiers, status codes, transfer outcomes and
//! pipe properties that flow between the host backend and the client.

use serde::{Deserialize, Serialize};

/// Stable device identity
///
/// Obtained from the host when a device is opened and reported again when the
/// device departs. Unlike a device handle it stays meaningful after the device
/// has been removed, so it is what removal notifications carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity(pub u64);

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Vendor/product matching filter
///
/// Plain value: every watch that needs it holds its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchFilter {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

impl MatchFilter {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Check whether a device with the given ids passes this filter
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl std::fmt::Display for MatchFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Host status codes
///
/// Maps to libusb error codes. See rusb::Error for details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsbError {
    /// Transfer timed out
    Timeout,
    /// Endpoint stalled (protocol error)
    Pipe,
    /// Device was disconnected
    NoDevice,
    /// Device or endpoint not found
    NotFound,
    /// Device is busy
    Busy,
    /// Buffer overflow
    Overflow,
    /// I/O error
    Io,
    /// Invalid parameter
    InvalidParam,
    /// Access denied (permissions)
    Access,
    /// Operation not supported by the host
    NotSupported,
    /// Other error with message
    Other { message: String },
}

impl std::fmt::Display for UsbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsbError::Timeout => write!(f, "operation timed out"),
            UsbError::Pipe => write!(f, "pipe stalled"),
            UsbError::NoDevice => write!(f, "no such device"),
            UsbError::NotFound => write!(f, "entity not found"),
            UsbError::Busy => write!(f, "resource busy"),
            UsbError::Overflow => write!(f, "overflow"),
            UsbError::Io => write!(f, "input/output error"),
            UsbError::InvalidParam => write!(f, "invalid parameter"),
            UsbError::Access => write!(f, "access denied"),
            UsbError::NotSupported => write!(f, "operation not supported"),
            UsbError::Other { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for UsbError {}

/// Status half of a [`TransferOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Success,
    Failed(UsbError),
}

/// Result of a control transfer or pipe operation
///
/// Always carries the host status together with the number of bytes the host
/// reports as actually transferred. The length is authoritative over whatever
/// length was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub status: TransferStatus,
    pub length: usize,
}

impl TransferOutcome {
    pub fn success(length: usize) -> Self {
        Self {
            status: TransferStatus::Success,
            length,
        }
    }

    pub fn failed(error: UsbError) -> Self {
        Self {
            status: TransferStatus::Failed(error),
            length: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Success
    }

    /// Convert into a `Result` carrying the transferred length
    pub fn into_result(self) -> Result<usize, UsbError> {
        match self.status {
            TransferStatus::Success => Ok(self.length),
            TransferStatus::Failed(error) => Err(error),
        }
    }
}

/// Pipe direction as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipeDirection {
    /// Host to device
    Out,
    /// Device to host
    In,
    None,
    /// Bidirectional (the control pipe)
    Any,
}

impl PipeDirection {
    /// Direction encoded in bit 7 of an endpoint address
    pub fn from_endpoint_address(address: u8) -> Self {
        if address & 0x80 != 0 {
            PipeDirection::In
        } else {
            PipeDirection::Out
        }
    }
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferKind {
    /// Transfer type encoded in bits 0..2 of an endpoint's bmAttributes
    pub fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => TransferKind::Control,
            1 => TransferKind::Isochronous,
            2 => TransferKind::Bulk,
            _ => TransferKind::Interrupt,
        }
    }
}

/// Properties of one pipe of an open interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeProperties {
    pub direction: PipeDirection,
    /// Endpoint number (address without the direction bit)
    pub endpoint: u8,
    pub kind: TransferKind,
    pub max_packet_size: u16,
    /// Polling interval
    pub interval: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_identity_display() {
        assert_eq!(DeviceIdentity(0x1234).to_string(), "0x1234");
    }

    #[test]
    fn test_match_filter() {
        let filter = MatchFilter::new(0x05ac, 0x1281);
        assert!(filter.matches(0x05ac, 0x1281));
        assert!(!filter.matches(0x05ac, 0x1282));
        assert_eq!(filter.to_string(), "05ac:1281");
    }

    #[test]
    fn test_outcome_into_result() {
        assert_eq!(TransferOutcome::success(18).into_result(), Ok(18));
        assert_eq!(
            TransferOutcome::failed(UsbError::Timeout).into_result(),
            Err(UsbError::Timeout)
        );
    }

    #[test]
    fn test_failed_outcome_has_no_length() {
        let outcome = TransferOutcome::failed(UsbError::Pipe);
        assert!(!outcome.is_success());
        assert_eq!(outcome.length, 0);
    }

    #[test]
    fn test_endpoint_decoding() {
        assert_eq!(PipeDirection::from_endpoint_address(0x81), PipeDirection::In);
        assert_eq!(PipeDirection::from_endpoint_address(0x02), PipeDirection::Out);
        assert_eq!(TransferKind::from_attributes(0x02), TransferKind::Bulk);
        assert_eq!(TransferKind::from_attributes(0x03), TransferKind::Interrupt);
        assert_eq!(TransferKind::from_attributes(0x0d), TransferKind::Isochronous);
    }
}
