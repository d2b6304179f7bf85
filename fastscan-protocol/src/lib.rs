//! Section decoding for the DVB Fast Scan channel list tables.
//!
//! Fast Scan operators broadcast their complete lineup on a single PID as two
//! private tables: a network table (0xBC) describing every transport stream
//! and its logical channel numbers, and a services table (0xBD) carrying the
//! service names and default PIDs.
//!
//! # Example
//!
//! ```rust
//! use fastscan_protocol::encode::{encode_services_section, SectionParams};
//! use fastscan_protocol::{FastScanSection, table_id};
//!
//! let data = encode_services_section(&SectionParams::new(0x0100, 0, 0, 0), &[]);
//! let section = FastScanSection::decode(&data).unwrap();
//! assert_eq!(section.table_id(), table_id::SERVICES);
//! ```

pub mod descriptors;
pub mod encode;
pub mod error;
pub mod network;
pub mod psi;
pub mod section;
pub mod services;
pub mod text;

pub use descriptors::{
    is_radio_service_type, LogicalChannel, SatelliteDeliveryDescriptor, ServiceDescriptor,
    ServiceListEntry,
};
pub use error::{DecodeError, Result};
pub use network::{NetworkSection, TransportStream};
pub use psi::{
    crc32_mpeg2, ChecksumVerifier, LongSection, Mpeg2Crc, SectionHeader, SkipChecksum,
    MAX_SECTION_SIZE,
};
pub use section::{is_fastscan_table, peek_header, table_id, FastScanSection};
pub use services::{FastScanService, ServiceHeader, ServiceKey, ServicesSection};
pub use text::decode_dvb_string;
