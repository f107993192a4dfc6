//! Test utilities for simple-usb
//!
//! Byte builders for the descriptors a device returns, used by the mock host
//! and the test suites of every crate.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{create_config_chain, create_mock_device_descriptor};
//!
//! let device = create_mock_device_descriptor(0x05ac, 0x1281);
//! assert_eq!(device.len(), 18);
//!
//! // One interface with two endpoints, one with none
//! let config = create_config_chain(1, &[2, 0]);
//! assert_eq!(config.len(), 9 + 9 + 2 * 7 + 9);
//! ```

/// Create a mock USB device descriptor (GET_DESCRIPTOR Device)
///
/// Returns a standard 18-byte descriptor with string indices 1, 2 and 3 for
/// manufacturer, product and serial number.
pub fn create_mock_device_descriptor(vendor_id: u16, product_id: u16) -> Vec<u8> {
    let [vid_lo, vid_hi] = vendor_id.to_le_bytes();
    let [pid_lo, pid_hi] = product_id.to_le_bytes();
    vec![
        0x12, // bLength
        0x01, // bDescriptorType (Device)
        0x00, 0x02, // bcdUSB (2.00)
        0x00, // bDeviceClass
        0x00, // bDeviceSubClass
        0x00, // bDeviceProtocol
        0x40, // bMaxPacketSize0 (64 bytes)
        vid_lo, vid_hi, // idVendor
        pid_lo, pid_hi, // idProduct
        0x00, 0x01, // bcdDevice (1.00)
        0x01, // iManufacturer
        0x02, // iProduct
        0x03, // iSerialNumber
        0x01, // bNumConfigurations
    ]
}

/// Create a configuration chain with `endpoints[i]` endpoints on interface `i`
///
/// Endpoints alternate bulk IN / bulk OUT and are numbered from 1 within each
/// interface. wTotalLength matches the returned buffer.
pub fn create_config_chain(configuration_value: u8, endpoints: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (number, &count) in endpoints.iter().enumerate() {
        body.extend_from_slice(&[
            0x09,
            0x04,
            number as u8,
            0x00,
            count,
            0xff,
            0x00,
            0x00,
            0x00,
        ]);
        for ep in 0..count {
            let address = (ep + 1) | if ep % 2 == 0 { 0x80 } else { 0x00 };
            body.extend_from_slice(&[0x07, 0x05, address, 0x02, 0x00, 0x02, 0x00]);
        }
    }

    let [lo, hi] = ((9 + body.len()) as u16).to_le_bytes();
    let mut buf = vec![
        0x09,
        0x02,
        lo,
        hi,
        endpoints.len() as u8,
        configuration_value,
        0x00,
        0x80,
        0x32,
    ];
    buf.extend(body);
    buf
}

/// Create a string descriptor for `text`
pub fn create_string_descriptor(text: &str) -> Vec<u8> {
    protocol::encode_string_descriptor(text)
}

/// Create string descriptor 0 listing US English only
pub fn create_language_descriptor() -> Vec<u8> {
    vec![0x04, 0x03, 0x09, 0x04]
}

/// Payload of `len` bytes counting up from `seed`, wrapping at 0xff
///
/// Used as pipe read data and write payloads so a test can tell two buffers
/// apart by their first byte.
pub fn create_pipe_payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Expected wire bytes of a setup packet
///
/// Built field by field rather than through `SetupPacket::to_bytes`, so tests
/// comparing the two check the encoder.
pub fn create_setup_bytes(
    request_type: u8,
    request: u8,
    value: u16,
    index: u16,
    length: u16,
) -> [u8; 8] {
    let [value_lo, value_hi] = value.to_le_bytes();
    let [index_lo, index_hi] = index.to_le_bytes();
    let [length_lo, length_hi] = length.to_le_bytes();
    [
        request_type,
        request,
        value_lo,
        value_hi,
        index_lo,
        index_hi,
        length_lo,
        length_hi,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{
        Configuration, DescriptorType, DeviceDescriptor, SetupPacket, StringDescriptor,
    };

    #[test]
    fn test_create_mock_device_descriptor() {
        let desc = create_mock_device_descriptor(0x1234, 0x5678);

        assert_eq!(desc.len(), 18);
        assert_eq!(desc[0], 0x12); // bLength
        assert_eq!(desc[1], 0x01); // bDescriptorType

        let parsed = DeviceDescriptor::parse(&desc).unwrap();
        assert_eq!(parsed.vendor_id, 0x1234);
        assert_eq!(parsed.product_id, 0x5678);
    }

    #[test]
    fn test_create_config_chain() {
        let desc = create_config_chain(2, &[0, 1, 2]);
        let config = Configuration::parse(&desc).unwrap();

        assert_eq!(config.descriptor.configuration_value, 2);
        assert_eq!(config.descriptor.total_length as usize, desc.len());
        assert_eq!(config.interfaces.len(), 3);
        assert_eq!(config.interfaces[2].endpoints[0].endpoint_address, 0x81);
        assert_eq!(config.interfaces[2].endpoints[1].endpoint_address, 0x02);
    }

    #[test]
    fn test_create_string_descriptor() {
        let desc = create_string_descriptor("SN42");
        assert_eq!(desc[0] as usize, desc.len());

        let parsed = StringDescriptor::new(&desc).unwrap();
        // The lossy decode loses the last character to the terminator
        assert_eq!(parsed.decode_ascii().unwrap(), "SN4");
        assert_eq!(parsed.decode_utf16(), "SN42");
    }

    #[test]
    fn test_create_pipe_payload() {
        let data = create_pipe_payload(300, 0xf0);

        assert_eq!(data.len(), 300);
        assert_eq!(data[0], 0xf0);
        assert_eq!(data[15], 0xff);
        assert_eq!(data[16], 0x00); // Wraps around
    }

    #[test]
    fn test_create_setup_bytes_matches_encoder() {
        let bytes = create_setup_bytes(0x80, 0x06, 0x0302, 0x0409, 0x00ff);

        assert_eq!(bytes, [0x80, 0x06, 0x02, 0x03, 0x09, 0x04, 0xff, 0x00]);
        assert_eq!(SetupPacket::from_bytes(&bytes).to_bytes(), bytes);
        assert_eq!(
            SetupPacket::get_descriptor(DescriptorType::String, 2, 0xff).to_bytes(),
            bytes
        );
    }
}
