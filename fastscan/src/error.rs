//! Error types for scanning.

use fastscan_protocol::DecodeError;
use thiserror::Error;

/// Scan-level errors.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A table collector gave up waiting before every section arrived.
    #[error("Table 0x{table_id:02X} timed out with {seen}/{expected} sections")]
    CollectorTimeout {
        table_id: u8,
        seen: usize,
        expected: usize,
    },

    /// The frontend could not be acquired.
    #[error("Frontend {0} unavailable")]
    ResourceUnavailable(u32),

    /// Section decode error.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bouquet sink rejected a bouquet.
    #[error("Bouquet sink error: {0}")]
    Sink(String),
}

/// Result type for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;
