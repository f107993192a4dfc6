//! Control request encoding
//!
//! A control transfer starts with an 8-byte setup packet:
//!
//! ```text
//! [bmRequestType: u8][bRequest: u8][wValue: u16 LE][wIndex: u16 LE][wLength: u16 LE]
//! ```
//!
//! `bmRequestType` packs the transfer direction (bit 7), the request kind
//! (bits 5..6) and the recipient (bits 0..4).

use crate::descriptor::DescriptorType;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Language id sent in wIndex when fetching string descriptors (US English)
pub const LANGID_US_ENGLISH: u16 = 0x0409;

/// Size of an encoded setup packet
pub const SETUP_PACKET_LEN: usize = 8;

/// Data stage direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    ToDevice = 0x00,
    ToHost = 0x80,
}

/// Request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestKind {
    Standard = 0x00,
    Class = 0x20,
    Vendor = 0x40,
}

/// Request recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Recipient {
    Device = 0x00,
    Interface = 0x01,
    Endpoint = 0x02,
    Other = 0x03,
}

/// Standard request codes (bRequest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StandardRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0a,
    SetInterface = 0x0b,
}

impl From<StandardRequest> for u8 {
    fn from(request: StandardRequest) -> u8 {
        request as u8
    }
}

/// Encoded bmRequestType byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestType(pub u8);

impl RequestType {
    pub fn new(direction: Direction, kind: RequestKind, recipient: Recipient) -> Self {
        Self(direction as u8 | kind as u8 | recipient as u8)
    }

    pub fn direction(self) -> Direction {
        if self.0 & 0x80 != 0 {
            Direction::ToHost
        } else {
            Direction::ToDevice
        }
    }

    /// Request kind, or `None` for the reserved kind value (0x60)
    pub fn kind(self) -> Option<RequestKind> {
        match self.0 & 0x60 {
            0x00 => Some(RequestKind::Standard),
            0x20 => Some(RequestKind::Class),
            0x40 => Some(RequestKind::Vendor),
            _ => None,
        }
    }

    /// Recipient, or `None` for reserved recipient values
    pub fn recipient(self) -> Option<Recipient> {
        match self.0 & 0x1f {
            0x00 => Some(Recipient::Device),
            0x01 => Some(Recipient::Interface),
            0x02 => Some(Recipient::Endpoint),
            0x03 => Some(Recipient::Other),
            _ => None,
        }
    }
}

impl From<u8> for RequestType {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Control request record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupPacket {
    pub request_type: RequestType,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Build the GET_DESCRIPTOR request for a descriptor type and index
    ///
    /// String descriptors are requested in US English, everything else with
    /// wIndex 0.
    pub fn get_descriptor(descriptor_type: DescriptorType, index: u8, length: u16) -> Self {
        let language = match descriptor_type {
            DescriptorType::String => LANGID_US_ENGLISH,
            _ => 0,
        };

        Self {
            request_type: RequestType::new(
                Direction::ToHost,
                RequestKind::Standard,
                Recipient::Device,
            ),
            request: StandardRequest::GetDescriptor.into(),
            value: ((descriptor_type.code() as u16) << 8) | index as u16,
            index: language,
            length,
        }
    }

    /// Little-endian wire form
    pub fn to_bytes(&self) -> [u8; SETUP_PACKET_LEN] {
        let mut bytes = [0u8; SETUP_PACKET_LEN];
        bytes[0] = self.request_type.0;
        bytes[1] = self.request;
        LittleEndian::write_u16(&mut bytes[2..4], self.value);
        LittleEndian::write_u16(&mut bytes[4..6], self.index);
        LittleEndian::write_u16(&mut bytes[6..8], self.length);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; SETUP_PACKET_LEN]) -> Self {
        Self {
            request_type: RequestType(bytes[0]),
            request: bytes[1],
            value: LittleEndian::read_u16(&bytes[2..4]),
            index: LittleEndian::read_u16(&bytes[4..6]),
            length: LittleEndian::read_u16(&bytes[6..8]),
        }
    }
}
