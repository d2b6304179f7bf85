//! Fast Scan network table (table id 0xBC).
//!
//! The network table follows the NIT layout: a network descriptor loop
//! carrying the network name, then one entry per transport stream with its
//! satellite delivery parameters, service list and logical channel numbers.

use log::debug;
use serde::Serialize;

use crate::descriptors::{
    parse_descriptor_loop, Descriptor, LogicalChannel, SatelliteDeliveryDescriptor,
    ServiceListEntry,
};
use crate::error::{DecodeError, Result};
use crate::psi::{read_length, read_u16, take, ChecksumVerifier, LongSection, Mpeg2Crc};
use crate::section::table_id;

/// Size of the fixed transport stream header preceding each descriptor loop.
pub const TRANSPORT_STREAM_HEADER_SIZE: usize = 6;

/// Transport stream entry in the network table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportStream {
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Original network ID.
    pub original_network_id: u16,
    /// Satellite delivery descriptor (if present).
    pub delivery: Option<SatelliteDeliveryDescriptor>,
    /// Services carried, in broadcast order.
    pub service_list: Vec<ServiceListEntry>,
    /// Logical channel numbers, in broadcast order.
    pub logical_channels: Vec<LogicalChannel>,
}

impl TransportStream {
    /// Parse one transport stream entry at the start of `data`.
    ///
    /// Returns the entry and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let header = take(data, 0, TRANSPORT_STREAM_HEADER_SIZE)?;
        let transport_stream_id = read_u16(header, 0);
        let original_network_id = read_u16(header, 2);
        let loop_length = read_length(header, 4) as usize;

        let descriptors = take(data, TRANSPORT_STREAM_HEADER_SIZE, loop_length)?;

        let mut ts = TransportStream {
            transport_stream_id,
            original_network_id,
            ..Default::default()
        };

        for descriptor in parse_descriptor_loop(descriptors)? {
            match descriptor {
                Descriptor::SatelliteDelivery(desc) => {
                    ts.delivery.get_or_insert(desc);
                }
                Descriptor::ServiceList(desc) => ts.service_list.extend(desc.services),
                Descriptor::LogicalChannel(desc) => ts.logical_channels.extend(desc.channels),
                _ => {}
            }
        }

        Ok((ts, TRANSPORT_STREAM_HEADER_SIZE + loop_length))
    }

    /// Logical channel entry for a service.
    pub fn logical_channel(&self, service_id: u16) -> Option<&LogicalChannel> {
        self.logical_channels
            .iter()
            .find(|lcn| lcn.service_id == service_id)
    }

    /// Service type announced in the service list.
    pub fn service_type(&self, service_id: u16) -> Option<u8> {
        self.service_list
            .iter()
            .find(|s| s.service_id == service_id)
            .map(|s| s.service_type)
    }

    /// Get all service IDs of the service list.
    pub fn service_ids(&self) -> Vec<u16> {
        self.service_list.iter().map(|s| s.service_id).collect()
    }
}

/// Decoded network section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkSection {
    /// Operator network ID (table id extension).
    pub operator_network_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
    /// Network name (empty if the network loop carries no name).
    pub network_name: String,
    /// Transport stream loop.
    pub transport_streams: Vec<TransportStream>,
}

impl NetworkSection {
    /// Decode a raw network section, verifying its MPEG-2 CRC.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_with(data, &Mpeg2Crc)
    }

    /// Decode a raw network section with the given checksum primitive.
    pub fn decode_with(data: &[u8], verifier: &dyn ChecksumVerifier) -> Result<Self> {
        let section = LongSection::parse(data, verifier)?;
        Self::parse(&section)
    }

    /// Parse the payload of a framed long section.
    pub fn parse(section: &LongSection) -> Result<Self> {
        if section.header.table_id != table_id::NETWORK {
            return Err(DecodeError::UnknownTableId(section.header.table_id));
        }

        let data = section.payload;

        let network_descriptors_length = read_length(take(data, 0, 2)?, 0) as usize;
        let network_descriptors = take(data, 2, network_descriptors_length)?;

        let descriptors = parse_descriptor_loop(network_descriptors)?;
        if !matches!(descriptors.first(), Some(Descriptor::NetworkName(_))) {
            debug!(
                "network table 0x{:04X}: network loop does not start with a network name descriptor",
                section.header.table_id_extension
            );
        }
        let network_name = descriptors
            .into_iter()
            .find_map(|d| match d {
                Descriptor::NetworkName(name) => Some(name.network_name),
                _ => None,
            })
            .unwrap_or_default();

        let ts_loop_offset = 2 + network_descriptors_length;
        let ts_loop_length = read_length(take(data, ts_loop_offset, 2)?, 0) as usize;
        let ts_loop = take(data, ts_loop_offset + 2, ts_loop_length)?;

        let mut transport_streams = Vec::new();
        let mut offset = 0;
        while offset < ts_loop.len() {
            let (ts, consumed) = TransportStream::parse(&ts_loop[offset..])?;
            offset += consumed;
            transport_streams.push(ts);
        }

        Ok(NetworkSection {
            operator_network_id: section.header.table_id_extension,
            version_number: section.header.version_number,
            section_number: section.header.section_number,
            last_section_number: section.header.last_section_number,
            network_name,
            transport_streams,
        })
    }

    /// Find transport stream by ONID/TSID.
    pub fn find_transport_stream(
        &self,
        original_network_id: u16,
        transport_stream_id: u16,
    ) -> Option<&TransportStream> {
        self.transport_streams.iter().find(|ts| {
            ts.original_network_id == original_network_id
                && ts.transport_stream_id == transport_stream_id
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encode_network_section, SectionParams};
    use crate::psi::{crc32_mpeg2, SectionHeader};

    fn transport_stream() -> TransportStream {
        TransportStream {
            transport_stream_id: 0x0FA1,
            original_network_id: 0x0035,
            delivery: Some(SatelliteDeliveryDescriptor {
                frequency: 1_172_750,
                orbital_position: 192,
                west_east_flag: true,
                polarization: 0,
                roll_off: 0,
                modulation_system: 1,
                modulation_type: 2,
                symbol_rate: 275_000,
                fec_inner: 3,
            }),
            service_list: vec![
                ServiceListEntry { service_id: 1, service_type: 0x19 },
                ServiceListEntry { service_id: 2, service_type: 0x02 },
            ],
            logical_channels: vec![
                LogicalChannel { service_id: 1, visible: true, logical_channel_number: 5 },
                LogicalChannel { service_id: 2, visible: false, logical_channel_number: 801 },
            ],
        }
    }

    #[test]
    fn test_decode_network_section() {
        let streams = vec![transport_stream()];
        let data = encode_network_section(&SectionParams::new(0x0100, 7, 1, 1), "Canal Digitaal", &streams);

        let section = NetworkSection::decode(&data).unwrap();
        assert_eq!(section.operator_network_id, 0x0100);
        assert_eq!(section.version_number, 7);
        assert_eq!(section.section_number, 1);
        assert_eq!(section.last_section_number, 1);
        assert_eq!(section.network_name, "Canal Digitaal");
        assert_eq!(section.transport_streams, streams);

        let ts = section.find_transport_stream(0x0035, 0x0FA1).unwrap();
        assert_eq!(ts.service_ids(), vec![1, 2]);
        assert_eq!(ts.logical_channel(1).map(|l| l.logical_channel_number), Some(5));
        assert_eq!(ts.service_type(2), Some(0x02));
        assert!(ts.logical_channel(3).is_none());
        assert!(section.find_transport_stream(0x0035, 0x0FA2).is_none());
    }

    #[test]
    fn test_parse_transport_stream_without_delivery() {
        let data = [
            // TSID=0x0001, ONID=0x0002, descriptors_length=5
            0x00, 0x01, 0x00, 0x02, 0xF0, 0x05,
            // Service list: SID=0x0010, type=0x01
            0x41, 0x03, 0x00, 0x10, 0x01,
        ];
        let (ts, consumed) = TransportStream::parse(&data).unwrap();
        assert_eq!(consumed, data.len());
        assert!(ts.delivery.is_none());
        assert_eq!(ts.service_ids(), vec![0x0010]);
        assert!(ts.logical_channels.is_empty());
    }

    #[test]
    fn test_missing_network_name() {
        let mut data = vec![
            0xBC, 0xF0, 0x00, // table_id, length patched below
            0x01, 0x00, 0xC1, 0x00, 0x00,
            0xF0, 0x00, // network_descriptors_length = 0
            0xF0, 0x00, // transport_stream_loop_length = 0
        ];
        let section_length = (data.len() - 3 + 4) as u16;
        data[1] = 0xF0 | (section_length >> 8) as u8;
        data[2] = section_length as u8;
        let crc = crc32_mpeg2(&data);
        data.extend_from_slice(&crc.to_be_bytes());

        let header = SectionHeader::parse(&data).unwrap();
        assert_eq!(header.total_length(), data.len());

        let section = NetworkSection::decode(&data).unwrap();
        assert_eq!(section.network_name, "");
        assert!(section.transport_streams.is_empty());
    }

    #[test]
    fn test_network_name_after_other_descriptors() {
        let mut data = vec![
            0xBC, 0xF0, 0x00, // table_id, length patched below
            0x01, 0x00, 0xC1, 0x00, 0x00,
            0xF0, 0x09, // network_descriptors_length = 9
            0x5F, 0x04, 0x00, 0x00, 0x00, 0x01, // private data specifier
            0x40, 0x01, b'N', // network name
            0xF0, 0x00, // transport_stream_loop_length = 0
        ];
        let section_length = (data.len() - 3 + 4) as u16;
        data[1] = 0xF0 | (section_length >> 8) as u8;
        data[2] = section_length as u8;
        let crc = crc32_mpeg2(&data);
        data.extend_from_slice(&crc.to_be_bytes());

        let section = NetworkSection::decode(&data).unwrap();
        assert_eq!(section.network_name, "N");
    }

    #[test]
    fn test_transport_stream_loop_overrun() {
        let data = [0x00, 0x01, 0x00, 0x02, 0xF0, 0x10, 0x41, 0x03];
        assert!(matches!(
            TransportStream::parse(&data),
            Err(DecodeError::TruncatedSection { .. })
        ));
    }

    #[test]
    fn test_wrong_table_id() {
        let streams = vec![transport_stream()];
        let mut data = encode_network_section(&SectionParams::new(0x0100, 0, 0, 0), "X", &streams).to_vec();
        data[0] = 0xBD;
        let len = data.len();
        let crc = crc32_mpeg2(&data[..len - 4]);
        data[len - 4..].copy_from_slice(&crc.to_be_bytes());

        assert_eq!(NetworkSection::decode(&data), Err(DecodeError::UnknownTableId(0xBD)));
    }
}
