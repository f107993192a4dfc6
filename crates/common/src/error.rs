//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("USB error: {0}")]
    Usb(#[from] protocol::UsbError),

    #[error("Descriptor error: {0}")]
    Decode(#[from] protocol::DecodeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_usb_error() {
        let err: Error = protocol::UsbError::Access.into();
        assert_eq!(err.to_string(), "USB error: access denied");
    }

    #[test]
    fn test_from_decode_error() {
        let err: Error = protocol::DecodeError::BufferTooSmall {
            needed: 10,
            available: 4,
        }
        .into();
        assert!(matches!(err, Error::Decode(_)));
    }
}
