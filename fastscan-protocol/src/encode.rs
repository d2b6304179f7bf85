//! Section encoder.
//!
//! Builds byte-exact Fast Scan sections (with a valid CRC) from decoded
//! records. Used to synthesize tables for replay files and tests.

use bytes::{BufMut, Bytes, BytesMut};

use crate::descriptors::{tag, SatelliteDeliveryDescriptor, ServiceDescriptor};
use crate::network::TransportStream;
use crate::psi::{crc32_mpeg2, CRC_SIZE, LONG_HEADER_SIZE};
use crate::section::table_id;
use crate::services::{FastScanService, ServiceHeader};

/// Long section header fields chosen by the encoder's caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionParams {
    /// Table ID extension (operator network id).
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

impl SectionParams {
    pub fn new(
        table_id_extension: u16,
        version_number: u8,
        section_number: u8,
        last_section_number: u8,
    ) -> Self {
        Self {
            table_id_extension,
            version_number,
            section_number,
            last_section_number,
        }
    }
}

/// Wrap a payload in a long section header and append the CRC.
pub fn encode_long_section(table: u8, params: &SectionParams, payload: &[u8]) -> Bytes {
    let section_length = (LONG_HEADER_SIZE - 3 + payload.len() + CRC_SIZE) as u16;

    let mut buf = BytesMut::with_capacity(3 + section_length as usize);
    buf.put_u8(table);
    buf.put_u16(0xB000 | (section_length & 0x0FFF));
    buf.put_u16(params.table_id_extension);
    buf.put_u8(0xC0 | ((params.version_number & 0x1F) << 1) | 0x01);
    buf.put_u8(params.section_number);
    buf.put_u8(params.last_section_number);
    buf.put_slice(payload);

    let crc = crc32_mpeg2(&buf);
    buf.put_u32(crc);
    buf.freeze()
}

/// Encode a services section.
pub fn encode_services_section(params: &SectionParams, services: &[FastScanService]) -> Bytes {
    let mut payload = BytesMut::new();
    for service in services {
        put_service(&mut payload, service);
    }
    encode_long_section(table_id::SERVICES, params, &payload)
}

/// Encode a network section.
pub fn encode_network_section(
    params: &SectionParams,
    network_name: &str,
    transport_streams: &[TransportStream],
) -> Bytes {
    let mut network_descriptors = BytesMut::new();
    put_descriptor(&mut network_descriptors, tag::NETWORK_NAME, network_name.as_bytes());

    let mut ts_loop = BytesMut::new();
    for ts in transport_streams {
        put_transport_stream(&mut ts_loop, ts);
    }

    let mut payload = BytesMut::new();
    payload.put_u16(0xF000 | network_descriptors.len() as u16);
    payload.put_slice(&network_descriptors);
    payload.put_u16(0xF000 | ts_loop.len() as u16);
    payload.put_slice(&ts_loop);

    encode_long_section(table_id::NETWORK, params, &payload)
}

fn put_service(buf: &mut BytesMut, service: &FastScanService) {
    let mut descriptors = BytesMut::new();
    if let Some(desc) = &service.service_descriptor {
        put_descriptor(&mut descriptors, tag::SERVICE, &service_descriptor_payload(desc));
    }

    let header = ServiceHeader {
        original_network_id: service.original_network_id,
        transport_stream_id: service.transport_stream_id,
        service_id: service.service_id,
        default_video_pid: service.default_video_pid,
        default_audio_pid: service.default_audio_pid,
        default_video_ecm_pid: service.default_video_ecm_pid,
        default_audio_ecm_pid: service.default_audio_ecm_pid,
        default_pcr_pid: service.default_pcr_pid,
        descriptors_loop_length: descriptors.len() as u16,
    };
    header.put(buf);
    buf.put_slice(&descriptors);
}

fn put_transport_stream(buf: &mut BytesMut, ts: &TransportStream) {
    let mut descriptors = BytesMut::new();

    if let Some(delivery) = &ts.delivery {
        put_descriptor(&mut descriptors, tag::SATELLITE_DELIVERY, &satellite_delivery_payload(delivery));
    }

    if !ts.service_list.is_empty() {
        let mut list = BytesMut::new();
        for entry in &ts.service_list {
            list.put_u16(entry.service_id);
            list.put_u8(entry.service_type);
        }
        put_descriptor(&mut descriptors, tag::SERVICE_LIST, &list);
    }

    if !ts.logical_channels.is_empty() {
        let mut list = BytesMut::new();
        for lcn in &ts.logical_channels {
            list.put_u16(lcn.service_id);
            let visible = if lcn.visible { 0xC000 } else { 0x4000 };
            list.put_u16(visible | (lcn.logical_channel_number & 0x3FFF));
        }
        put_descriptor(&mut descriptors, tag::LOGICAL_CHANNEL, &list);
    }

    buf.put_u16(ts.transport_stream_id);
    buf.put_u16(ts.original_network_id);
    buf.put_u16(0xF000 | descriptors.len() as u16);
    buf.put_slice(&descriptors);
}

fn put_descriptor(buf: &mut BytesMut, descriptor_tag: u8, payload: &[u8]) {
    buf.put_u8(descriptor_tag);
    buf.put_u8(payload.len() as u8);
    buf.put_slice(payload);
}

fn service_descriptor_payload(desc: &ServiceDescriptor) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(desc.service_type);
    buf.put_u8(desc.provider_name.len() as u8);
    buf.put_slice(desc.provider_name.as_bytes());
    buf.put_u8(desc.service_name.len() as u8);
    buf.put_slice(desc.service_name.as_bytes());
    buf
}

fn satellite_delivery_payload(desc: &SatelliteDeliveryDescriptor) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u32(u32_to_bcd(desc.frequency));
    buf.put_u16(u32_to_bcd(desc.orbital_position as u32) as u16);
    buf.put_u8(
        ((desc.west_east_flag as u8) << 7)
            | ((desc.polarization & 0x03) << 5)
            | ((desc.roll_off & 0x03) << 3)
            | ((desc.modulation_system & 0x01) << 2)
            | (desc.modulation_type & 0x03),
    );
    buf.put_u32((u32_to_bcd(desc.symbol_rate) << 4) | (desc.fec_inner & 0x0F) as u32);
    buf
}

/// Convert a decimal value to packed BCD (up to 8 digits).
fn u32_to_bcd(mut value: u32) -> u32 {
    let mut result = 0u32;
    let mut shift = 0;
    while value > 0 && shift < 32 {
        result |= (value % 10) << shift;
        value /= 10;
        shift += 4;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::bcd_to_u32;
    use crate::psi::{LongSection, Mpeg2Crc};

    #[test]
    fn test_u32_to_bcd() {
        assert_eq!(u32_to_bcd(1234), 0x1234);
        assert_eq!(u32_to_bcd(0), 0);
        assert_eq!(bcd_to_u32(&u32_to_bcd(1_172_750).to_be_bytes()), 1_172_750);
    }

    #[test]
    fn test_long_section_layout() {
        let data = encode_long_section(0xBD, &SectionParams::new(0x1234, 9, 1, 2), &[0xAA, 0xBB]);
        assert_eq!(data.len(), 8 + 2 + 4);
        assert_eq!(&data[..8], &[0xBD, 0xB0, 0x0B, 0x12, 0x34, 0xD3, 0x01, 0x02]);

        let section = LongSection::parse(&data, &Mpeg2Crc).unwrap();
        assert_eq!(section.payload, &[0xAA, 0xBB]);
        assert_eq!(section.header.version_number, 9);
    }

    #[test]
    fn test_satellite_delivery_payload() {
        let desc = SatelliteDeliveryDescriptor {
            frequency: 1_172_750,
            orbital_position: 192,
            west_east_flag: true,
            polarization: 1,
            roll_off: 3,
            modulation_system: 1,
            modulation_type: 1,
            symbol_rate: 275_000,
            fec_inner: 3,
        };
        let payload = satellite_delivery_payload(&desc);
        assert_eq!(
            &payload[..],
            &[0x01, 0x17, 0x27, 0x50, 0x01, 0x92, 0xBD, 0x02, 0x75, 0x00, 0x03]
        );
        assert_eq!(SatelliteDeliveryDescriptor::parse(&payload).unwrap(), desc);
    }
}
