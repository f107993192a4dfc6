//! Integration tests for descriptor decoding
//!
//! Builds configuration chains byte by byte and checks the positional walk,
//! bounds handling and string decoding.

use proptest::prelude::*;
use protocol::{
    Configuration, DecodeError, DescriptorType, DeviceDescriptor, PipeDirection, SetupPacket,
    StringDescriptor, TransferKind, encode_string_descriptor,
};

fn config_header(num_interfaces: u8, total_length: u16) -> Vec<u8> {
    let [lo, hi] = total_length.to_le_bytes();
    vec![0x09, 0x02, lo, hi, num_interfaces, 0x01, 0x00, 0x80, 0x32]
}

fn interface(number: u8, num_endpoints: u8) -> Vec<u8> {
    vec![0x09, 0x04, number, 0x00, num_endpoints, 0xff, 0x00, 0x00, 0x00]
}

fn endpoint(address: u8, attributes: u8, max_packet: u16) -> Vec<u8> {
    let [lo, hi] = max_packet.to_le_bytes();
    vec![0x07, 0x05, address, attributes, lo, hi, 0x00]
}

fn chain(layout: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, &eps) in layout.iter().enumerate() {
        body.extend(interface(i as u8, eps));
        for e in 0..eps {
            body.extend(endpoint(0x81 + e, 0x02, 512));
        }
    }
    let total = (9 + body.len()) as u16;
    let mut buf = config_header(layout.len() as u8, total);
    buf.extend(body);
    buf
}

mod configuration {
    use super::*;

    #[test]
    fn test_no_interfaces() {
        let config = Configuration::parse(&chain(&[])).unwrap();
        assert_eq!(config.descriptor.num_interfaces, 0);
        assert!(config.interfaces.is_empty());
    }

    #[test]
    fn test_single_interface() {
        let config = Configuration::parse(&chain(&[2])).unwrap();
        assert_eq!(config.interfaces.len(), 1);

        let iface = &config.interfaces[0];
        assert_eq!(iface.descriptor.num_endpoints, 2);
        assert_eq!(iface.endpoints.len(), 2);
        assert_eq!(iface.endpoints[0].endpoint_address, 0x81);
        assert_eq!(iface.endpoints[1].endpoint_address, 0x82);
        assert_eq!(iface.endpoints[1].kind(), TransferKind::Bulk);
        assert_eq!(iface.endpoints[1].direction(), PipeDirection::In);
    }

    #[test]
    fn test_three_interfaces() {
        let config = Configuration::parse(&chain(&[0, 1, 2])).unwrap();
        let counts: Vec<usize> = config.interfaces.iter().map(|i| i.endpoints.len()).collect();
        assert_eq!(counts, vec![0, 1, 2]);

        let numbers: Vec<u8> = config
            .interfaces
            .iter()
            .map(|i| i.descriptor.interface_number)
            .collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(config.descriptor.total_length as usize, 9 + 27 + 21);
    }

    #[test]
    fn test_walk_ignores_type_bytes() {
        let mut buf = chain(&[1]);
        // Corrupt the interface and endpoint type bytes
        buf[10] = 0xee;
        buf[19] = 0xee;
        let config = Configuration::parse(&buf).unwrap();
        assert_eq!(config.interfaces[0].descriptor.descriptor_type, 0xee);
        assert_eq!(config.interfaces[0].endpoints[0].descriptor_type, 0xee);
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut buf = chain(&[1]);
        buf.extend([0xaa; 5]);
        let config = Configuration::parse(&buf).unwrap();
        assert_eq!(config.interfaces.len(), 1);
    }

    #[test]
    fn test_missing_endpoint() {
        let mut buf = config_header(1, 32);
        buf.extend(interface(0, 2));
        buf.extend(endpoint(0x81, 0x02, 64));

        let err = Configuration::parse(&buf).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MalformedDescriptor {
                offset: 25,
                needed: 7,
                available: 0
            }
        );
    }

    #[test]
    fn test_partial_interface() {
        let mut buf = config_header(2, 0);
        buf.extend(interface(0, 0));
        buf.extend([0x09, 0x04, 0x01]);

        let err = Configuration::parse(&buf).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MalformedDescriptor {
                offset: 18,
                needed: 9,
                available: 3
            }
        );
    }

    #[test]
    fn test_truncated_header() {
        let err = Configuration::parse(&[0x09, 0x02, 0x20]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { needed: 9, .. }));
    }

    #[test]
    fn test_reencode_matches_input() {
        let buf = chain(&[0, 1, 2]);
        let config = Configuration::parse(&buf).unwrap();
        assert_eq!(config.to_bytes(), buf);
    }

    #[test]
    fn test_json_export() {
        let config = Configuration::parse(&chain(&[1])).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"endpoint_address\":129"));

        let back: Configuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}

mod strings {
    use super::*;

    #[test]
    fn test_abc_decode() {
        let raw = [0x0a, 0x03, 0x41, 0x00, 0x42, 0x00, 0x43, 0x00, 0x44, 0x00];
        let mut out = [0u8; 32];

        let count = StringDescriptor::new(&raw)
            .unwrap()
            .decode_into(&mut out)
            .unwrap();

        assert_eq!(count, 4);
        assert_eq!(&out[..4], &[0x41, 0x42, 0x43, 0x00]);
    }

    #[test]
    fn test_capacity_below_declared_length() {
        let raw = encode_string_descriptor("Serial");
        let desc = StringDescriptor::new(&raw).unwrap();
        let mut out = vec![0x55u8; raw.len() - 1];

        assert!(matches!(
            desc.decode_into(&mut out),
            Err(DecodeError::BufferTooSmall { .. })
        ));
        assert!(out.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn test_utf16_decode() {
        let raw = encode_string_descriptor("Grüße");
        assert_eq!(StringDescriptor::new(&raw).unwrap().decode_utf16(), "Grüße");
    }
}

#[test]
fn test_device_descriptor_request() {
    let setup = SetupPacket::get_descriptor(DescriptorType::Device, 0, 18);
    assert_eq!(setup.to_bytes(), [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);

    let setup = SetupPacket::get_descriptor(DescriptorType::String, 2, 256);
    assert_eq!(setup.to_bytes(), [0x80, 0x06, 0x02, 0x03, 0x09, 0x04, 0x00, 0x01]);
}

proptest! {
    #[test]
    fn prop_configuration_parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..600)) {
        let _ = Configuration::parse(&bytes);
    }

    #[test]
    fn prop_device_parse_needs_eighteen_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..40)) {
        prop_assert_eq!(DeviceDescriptor::parse(&bytes).is_ok(), bytes.len() >= 18);
    }

    #[test]
    fn prop_string_decode_stays_in_bounds(
        bytes in proptest::collection::vec(any::<u8>(), 2..300),
        capacity in 0usize..300,
    ) {
        let desc = StringDescriptor::new(&bytes).unwrap();
        let mut out = vec![0u8; capacity];
        if let Ok(count) = desc.decode_into(&mut out) {
            prop_assert!(count <= capacity);
            prop_assert!(count <= (bytes[0] as usize).saturating_sub(2) / 2);
        }
    }
}
