//! Descriptor decode errors

use thiserror::Error;

/// Errors raised while decoding raw descriptor bytes
///
/// Every decoder in this crate bounds-checks its reads and reports one of these
/// instead of reading past the end of the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A fixed-size descriptor was given fewer bytes than its layout requires
    #[error("Truncated {kind} descriptor: needed {needed} bytes, got {available}")]
    Truncated {
        kind: &'static str,
        needed: usize,
        available: usize,
    },

    /// A descriptor chain declares more nested descriptors than the buffer holds
    #[error(
        "Malformed descriptor chain at offset {offset}: needed {needed} bytes, got {available}"
    )]
    MalformedDescriptor {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Destination buffer smaller than the descriptor's declared length
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Type alias for decode results
pub type Result<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::MalformedDescriptor {
            offset: 18,
            needed: 7,
            available: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("offset 18"));
        assert!(msg.contains("needed 7"));
    }

    #[test]
    fn test_truncated_names_kind() {
        let err = DecodeError::Truncated {
            kind: "device",
            needed: 18,
            available: 8,
        };
        assert!(err.to_string().contains("device"));
    }
}
