//! Error types for Fast Scan section decoding.

use thiserror::Error;

/// Section-local decode failures. A section that fails to decode is
/// discarded as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The trailing CRC32 does not match the section contents.
    #[error("Checksum invalid (stored CRC 0x{stored:08X})")]
    ChecksumInvalid { stored: u32 },

    /// Table ID is neither the network nor the services table.
    #[error("Unknown table id: 0x{0:02X}")]
    UnknownTableId(u8),

    /// A declared length reads past the end of the buffer.
    #[error("Truncated section: need {needed} bytes, have {available}")]
    TruncatedSection { needed: usize, available: usize },

    /// A descriptor payload is shorter than its tag requires.
    #[error("Descriptor 0x{tag:02X} too short: {length} bytes (min: {minimum})")]
    DescriptorTooShort {
        tag: u8,
        length: usize,
        minimum: usize,
    },

    /// The same service key appears twice within one section.
    #[error(
        "Duplicate service: ONID=0x{original_network_id:04X}, TSID=0x{transport_stream_id:04X}, SID=0x{service_id:04X}"
    )]
    DuplicateService {
        original_network_id: u16,
        transport_stream_id: u16,
        service_id: u16,
    },
}

/// Result alias for decoding.
pub type Result<T> = std::result::Result<T, DecodeError>;
