//! Fixed-layout USB descriptors
//!
//! All descriptors are byte-packed and little-endian. Decoders read fields at
//! fixed offsets and bounds-check every read.
//!
//! A configuration descriptor is fetched as one buffer holding the 9-byte
//! configuration header followed, for each of its `bNumInterfaces`, by a
//! 9-byte interface header and that interface's `bNumEndpoints` 7-byte
//! endpoint headers:
//!
//! ```text
//! [config][iface 0][ep 0.0][ep 0.1]..[iface 1][ep 1.0]..
//! ```
//!
//! The walk is purely positional; descriptor type bytes are not consulted.

use crate::error::{DecodeError, Result};
use crate::types::{PipeDirection, TransferKind};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

pub const DEVICE_DESCRIPTOR_LEN: usize = 18;
pub const CONFIG_DESCRIPTOR_LEN: usize = 9;
pub const INTERFACE_DESCRIPTOR_LEN: usize = 9;
pub const ENDPOINT_DESCRIPTOR_LEN: usize = 7;

/// Descriptor types accepted by GET_DESCRIPTOR
///
/// `String` and `Interface` share the code 0x03. They are separate variants
/// and the caller's context decides which one is meant; compare variants,
/// never their codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorType {
    Device,
    Config,
    String,
    Interface,
    Endpoint,
}

impl DescriptorType {
    pub fn code(self) -> u8 {
        match self {
            DescriptorType::Device => 0x01,
            DescriptorType::Config => 0x02,
            DescriptorType::String => 0x03,
            DescriptorType::Interface => 0x03,
            DescriptorType::Endpoint => 0x05,
        }
    }
}

fn check_len(kind: &'static str, buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(DecodeError::Truncated {
            kind,
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// USB device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    /// bcdUSB
    pub usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// Max packet size of the control endpoint
    pub max_packet_size: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice
    pub device_version: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        check_len("device", buf, DEVICE_DESCRIPTOR_LEN)?;

        Ok(Self {
            length: buf[0],
            descriptor_type: buf[1],
            usb_version: LittleEndian::read_u16(&buf[2..4]),
            class: buf[4],
            subclass: buf[5],
            protocol: buf[6],
            max_packet_size: buf[7],
            vendor_id: LittleEndian::read_u16(&buf[8..10]),
            product_id: LittleEndian::read_u16(&buf[10..12]),
            device_version: LittleEndian::read_u16(&buf[12..14]),
            manufacturer_index: buf[14],
            product_index: buf[15],
            serial_number_index: buf[16],
            num_configurations: buf[17],
        })
    }

    pub fn to_bytes(&self) -> [u8; DEVICE_DESCRIPTOR_LEN] {
        let mut buf = [0u8; DEVICE_DESCRIPTOR_LEN];
        buf[0] = self.length;
        buf[1] = self.descriptor_type;
        LittleEndian::write_u16(&mut buf[2..4], self.usb_version);
        buf[4] = self.class;
        buf[5] = self.subclass;
        buf[6] = self.protocol;
        buf[7] = self.max_packet_size;
        LittleEndian::write_u16(&mut buf[8..10], self.vendor_id);
        LittleEndian::write_u16(&mut buf[10..12], self.product_id);
        LittleEndian::write_u16(&mut buf[12..14], self.device_version);
        buf[14] = self.manufacturer_index;
        buf[15] = self.product_index;
        buf[16] = self.serial_number_index;
        buf[17] = self.num_configurations;
        buf
    }

    // Index 0 means "no string".
    pub fn manufacturer_string_index(&self) -> Option<u8> {
        (self.manufacturer_index != 0).then_some(self.manufacturer_index)
    }

    pub fn product_string_index(&self) -> Option<u8> {
        (self.product_index != 0).then_some(self.product_index)
    }

    pub fn serial_number_string_index(&self) -> Option<u8> {
        (self.serial_number_index != 0).then_some(self.serial_number_index)
    }
}

/// USB configuration descriptor header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_index: u8,
    pub attributes: u8,
    pub max_power: u8,
}

impl ConfigDescriptor {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        check_len("configuration", buf, CONFIG_DESCRIPTOR_LEN)?;

        Ok(Self {
            length: buf[0],
            descriptor_type: buf[1],
            total_length: LittleEndian::read_u16(&buf[2..4]),
            num_interfaces: buf[4],
            configuration_value: buf[5],
            configuration_index: buf[6],
            attributes: buf[7],
            max_power: buf[8],
        })
    }

    pub fn to_bytes(&self) -> [u8; CONFIG_DESCRIPTOR_LEN] {
        let mut buf = [0u8; CONFIG_DESCRIPTOR_LEN];
        buf[0] = self.length;
        buf[1] = self.descriptor_type;
        LittleEndian::write_u16(&mut buf[2..4], self.total_length);
        buf[4] = self.num_interfaces;
        buf[5] = self.configuration_value;
        buf[6] = self.configuration_index;
        buf[7] = self.attributes;
        buf[8] = self.max_power;
        buf
    }
}

/// USB interface descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub interface_index: u8,
}

impl InterfaceDescriptor {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        check_len("interface", buf, INTERFACE_DESCRIPTOR_LEN)?;

        Ok(Self {
            length: buf[0],
            descriptor_type: buf[1],
            interface_number: buf[2],
            alternate_setting: buf[3],
            num_endpoints: buf[4],
            class: buf[5],
            subclass: buf[6],
            protocol: buf[7],
            interface_index: buf[8],
        })
    }

    pub fn to_bytes(&self) -> [u8; INTERFACE_DESCRIPTOR_LEN] {
        [
            self.length,
            self.descriptor_type,
            self.interface_number,
            self.alternate_setting,
            self.num_endpoints,
            self.class,
            self.subclass,
            self.protocol,
            self.interface_index,
        ]
    }
}

/// USB endpoint descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        check_len("endpoint", buf, ENDPOINT_DESCRIPTOR_LEN)?;

        Ok(Self {
            length: buf[0],
            descriptor_type: buf[1],
            endpoint_address: buf[2],
            attributes: buf[3],
            max_packet_size: LittleEndian::read_u16(&buf[4..6]),
            interval: buf[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; ENDPOINT_DESCRIPTOR_LEN] {
        let mut buf = [0u8; ENDPOINT_DESCRIPTOR_LEN];
        buf[0] = self.length;
        buf[1] = self.descriptor_type;
        buf[2] = self.endpoint_address;
        buf[3] = self.attributes;
        LittleEndian::write_u16(&mut buf[4..6], self.max_packet_size);
        buf[6] = self.interval;
        buf
    }

    /// Endpoint number without the direction bit
    pub fn number(&self) -> u8 {
        self.endpoint_address & 0x0f
    }

    pub fn direction(&self) -> PipeDirection {
        PipeDirection::from_endpoint_address(self.endpoint_address)
    }

    pub fn kind(&self) -> TransferKind {
        TransferKind::from_attributes(self.attributes)
    }
}

/// One interface header with the endpoints that follow it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// A decoded configuration descriptor chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub descriptor: ConfigDescriptor,
    pub interfaces: Vec<Interface>,
}

impl Configuration {
    /// Walk a configuration buffer
    ///
    /// `buf` should be exactly the bytes the device returned. Any nested
    /// header that does not fit fails with `MalformedDescriptor`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let descriptor = ConfigDescriptor::parse(buf)?;
        let mut reader = ChainReader {
            buf,
            offset: CONFIG_DESCRIPTOR_LEN,
        };

        let mut interfaces = Vec::with_capacity(descriptor.num_interfaces as usize);
        for _ in 0..descriptor.num_interfaces {
            let interface = InterfaceDescriptor::parse(reader.take(INTERFACE_DESCRIPTOR_LEN)?)?;

            let mut endpoints = Vec::with_capacity(interface.num_endpoints as usize);
            for _ in 0..interface.num_endpoints {
                endpoints.push(EndpointDescriptor::parse(
                    reader.take(ENDPOINT_DESCRIPTOR_LEN)?,
                )?);
            }

            interfaces.push(Interface {
                descriptor: interface,
                endpoints,
            });
        }

        Ok(Self {
            descriptor,
            interfaces,
        })
    }

    /// Re-encode the chain in the same contiguous layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.descriptor.to_bytes());
        for interface in &self.interfaces {
            buf.extend_from_slice(&interface.descriptor.to_bytes());
            for endpoint in &interface.endpoints {
                buf.extend_from_slice(&endpoint.to_bytes());
            }
        }
        buf
    }

    fn encoded_len(&self) -> usize {
        CONFIG_DESCRIPTOR_LEN
            + self
                .interfaces
                .iter()
                .map(|i| INTERFACE_DESCRIPTOR_LEN + i.endpoints.len() * ENDPOINT_DESCRIPTOR_LEN)
                .sum::<usize>()
    }
}

struct ChainReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ChainReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let available = self.buf.len().saturating_sub(self.offset);
        if available < len {
            return Err(DecodeError::MalformedDescriptor {
                offset: self.offset,
                needed: len,
                available,
            });
        }

        let slice = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }
}
