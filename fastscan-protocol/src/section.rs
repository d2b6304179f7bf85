//! Table-id dispatch over the two Fast Scan section layouts.

use serde::Serialize;

use crate::error::{DecodeError, Result};
use crate::network::NetworkSection;
use crate::psi::{ChecksumVerifier, LongSection, Mpeg2Crc, SectionHeader};
use crate::services::ServicesSection;

/// Fast Scan table IDs.
pub mod table_id {
    pub const NETWORK: u8 = 0xBC;
    pub const SERVICES: u8 = 0xBD;
}

/// A decoded Fast Scan section of either table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum FastScanSection {
    Network(NetworkSection),
    Services(ServicesSection),
}

impl FastScanSection {
    /// Decode a raw section, verifying its MPEG-2 CRC.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_with(data, &Mpeg2Crc)
    }

    /// Decode a raw section with the given checksum primitive.
    ///
    /// The checksum is verified before the table id is interpreted.
    pub fn decode_with(data: &[u8], verifier: &dyn ChecksumVerifier) -> Result<Self> {
        let section = LongSection::parse(data, verifier)?;

        match section.header.table_id {
            table_id::NETWORK => Ok(FastScanSection::Network(NetworkSection::parse(&section)?)),
            table_id::SERVICES => Ok(FastScanSection::Services(ServicesSection::parse(&section)?)),
            other => Err(DecodeError::UnknownTableId(other)),
        }
    }

    /// Table ID of the decoded section.
    pub fn table_id(&self) -> u8 {
        match self {
            FastScanSection::Network(_) => table_id::NETWORK,
            FastScanSection::Services(_) => table_id::SERVICES,
        }
    }
}

/// Returns true if `table` is one of the Fast Scan table IDs.
pub fn is_fastscan_table(table: u8) -> bool {
    matches!(table, table_id::NETWORK | table_id::SERVICES)
}

/// Peek the long section header of a raw buffer.
pub fn peek_header(data: &[u8]) -> Result<SectionHeader> {
    SectionHeader::parse(data)
}
