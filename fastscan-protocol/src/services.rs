//! Fast Scan services table (table id 0xBD).
//!
//! The services table lists every service of the operator lineup together
//! with its default elementary stream PIDs, so that a receiver can start
//! playback without first reading the PAT/PMT of each carrier.

use std::collections::HashSet;
use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::descriptors::{parse_descriptor_loop, Descriptor, ServiceDescriptor};
use crate::error::{DecodeError, Result};
use crate::psi::{read_length, read_pid, read_u16, take, ChecksumVerifier, LongSection, Mpeg2Crc};
use crate::section::table_id;

/// Size of the fixed service header preceding each descriptor loop.
pub const SERVICE_HEADER_SIZE: usize = 18;

/// Key identifying a service across the whole lineup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServiceKey {
    pub original_network_id: u16,
    pub transport_stream_id: u16,
    pub service_id: u16,
}

impl ServiceKey {
    pub fn new(original_network_id: u16, transport_stream_id: u16, service_id: u16) -> Self {
        Self {
            original_network_id,
            transport_stream_id,
            service_id,
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}:{:04x}",
            self.original_network_id, self.transport_stream_id, self.service_id
        )
    }
}

/// Fixed 18-byte service header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceHeader {
    pub original_network_id: u16,
    pub transport_stream_id: u16,
    pub service_id: u16,
    pub default_video_pid: u16,
    pub default_audio_pid: u16,
    pub default_video_ecm_pid: u16,
    pub default_audio_ecm_pid: u16,
    pub default_pcr_pid: u16,
    /// Length of the descriptor loop following the header (12 bits).
    pub descriptors_loop_length: u16,
}

impl ServiceHeader {
    /// Parse a service header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let data = take(data, 0, SERVICE_HEADER_SIZE)?;

        Ok(ServiceHeader {
            original_network_id: read_u16(data, 0),
            transport_stream_id: read_u16(data, 2),
            service_id: read_u16(data, 4),
            default_video_pid: read_pid(data, 6),
            default_audio_pid: read_pid(data, 8),
            default_video_ecm_pid: read_pid(data, 10),
            default_audio_ecm_pid: read_pid(data, 12),
            default_pcr_pid: read_pid(data, 14),
            descriptors_loop_length: read_length(data, 16),
        })
    }

    /// Write the header with all reserved bits set.
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.original_network_id);
        buf.put_u16(self.transport_stream_id);
        buf.put_u16(self.service_id);
        for pid in [
            self.default_video_pid,
            self.default_audio_pid,
            self.default_video_ecm_pid,
            self.default_audio_ecm_pid,
            self.default_pcr_pid,
        ] {
            buf.put_u16(0xE000 | (pid & 0x1FFF));
        }
        buf.put_u16(0xF000 | (self.descriptors_loop_length & 0x0FFF));
    }

    /// Service key of this header.
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(
            self.original_network_id,
            self.transport_stream_id,
            self.service_id,
        )
    }
}

/// A service entry of the services table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FastScanService {
    /// Original network ID.
    pub original_network_id: u16,
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Service ID.
    pub service_id: u16,
    /// Default video PID (13 bits).
    pub default_video_pid: u16,
    /// Default audio PID (13 bits).
    pub default_audio_pid: u16,
    /// ECM PID of the default video stream.
    pub default_video_ecm_pid: u16,
    /// ECM PID of the default audio stream.
    pub default_audio_ecm_pid: u16,
    /// Default PCR PID.
    pub default_pcr_pid: u16,
    /// Parsed service descriptor.
    pub service_descriptor: Option<ServiceDescriptor>,
}

impl FastScanService {
    /// Parse one service (header and descriptor loop) at the start of `data`.
    ///
    /// Returns the service and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let header = ServiceHeader::parse(data)?;
        let loop_length = header.descriptors_loop_length as usize;
        let descriptors = take(data, SERVICE_HEADER_SIZE, loop_length)?;

        let mut service = FastScanService::from_header(&header);
        for descriptor in parse_descriptor_loop(descriptors)? {
            if let Descriptor::Service(desc) = descriptor {
                service.service_descriptor.get_or_insert(desc);
            }
        }

        Ok((service, SERVICE_HEADER_SIZE + loop_length))
    }

    /// Build a service without descriptors from its header.
    pub fn from_header(header: &ServiceHeader) -> Self {
        FastScanService {
            original_network_id: header.original_network_id,
            transport_stream_id: header.transport_stream_id,
            service_id: header.service_id,
            default_video_pid: header.default_video_pid,
            default_audio_pid: header.default_audio_pid,
            default_video_ecm_pid: header.default_video_ecm_pid,
            default_audio_ecm_pid: header.default_audio_ecm_pid,
            default_pcr_pid: header.default_pcr_pid,
            service_descriptor: None,
        }
    }

    /// Key identifying this service.
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(
            self.original_network_id,
            self.transport_stream_id,
            self.service_id,
        )
    }

    /// Get service name (from service descriptor).
    pub fn service_name(&self) -> Option<&str> {
        self.service_descriptor
            .as_ref()
            .map(|d| d.service_name.as_str())
    }

    /// Get provider name (from service descriptor).
    pub fn provider_name(&self) -> Option<&str> {
        self.service_descriptor
            .as_ref()
            .map(|d| d.provider_name.as_str())
    }

    /// Get service type (from service descriptor).
    pub fn service_type(&self) -> Option<u8> {
        self.service_descriptor.as_ref().map(|d| d.service_type)
    }
}

/// Decoded services section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServicesSection {
    /// Operator network ID (table id extension).
    pub operator_network_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
    /// Services in section order.
    pub services: Vec<FastScanService>,
}

impl ServicesSection {
    /// Decode a raw services section, verifying its MPEG-2 CRC.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_with(data, &Mpeg2Crc)
    }

    /// Decode a raw services section with the given checksum primitive.
    pub fn decode_with(data: &[u8], verifier: &dyn ChecksumVerifier) -> Result<Self> {
        let section = LongSection::parse(data, verifier)?;
        Self::parse(&section)
    }

    /// Parse the payload of a framed long section.
    pub fn parse(section: &LongSection) -> Result<Self> {
        if section.header.table_id != table_id::SERVICES {
            return Err(DecodeError::UnknownTableId(section.header.table_id));
        }

        let data = section.payload;
        let mut services = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = 0;

        while offset < data.len() {
            let (service, consumed) = FastScanService::parse(&data[offset..])?;
            offset += consumed;

            let key = service.key();
            if !seen.insert(key) {
                return Err(DecodeError::DuplicateService {
                    original_network_id: key.original_network_id,
                    transport_stream_id: key.transport_stream_id,
                    service_id: key.service_id,
                });
            }
            services.push(service);
        }

        Ok(ServicesSection {
            operator_network_id: section.header.table_id_extension,
            version_number: section.header.version_number,
            section_number: section.header.section_number,
            last_section_number: section.header.last_section_number,
            services,
        })
    }

    /// Find service by key.
    pub fn find_service(&self, key: &ServiceKey) -> Option<&FastScanService> {
        self.services.iter().find(|s| s.key() == *key)
    }
}
