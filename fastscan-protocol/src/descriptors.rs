//! Descriptor parsing for the Fast Scan tables.
//!
//! Descriptors are tag/length/value records. Each known tag has its own
//! parser; [`Descriptor::parse`] dispatches on the tag and keeps unknown tags
//! as [`Descriptor::Unknown`] so that newer broadcasts still decode.

use serde::Serialize;

use crate::error::{DecodeError, Result};
use crate::psi::{read_u16, take};
use crate::text::decode_dvb_string;

/// Descriptor tags used by the Fast Scan tables.
pub mod tag {
    pub const NETWORK_NAME: u8 = 0x40;
    pub const SERVICE_LIST: u8 = 0x41;
    pub const SATELLITE_DELIVERY: u8 = 0x43;
    pub const SERVICE: u8 = 0x48;
    pub const LOGICAL_CHANNEL: u8 = 0x83;
}

/// Service descriptor (0x48).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    /// Service type.
    pub service_type: u8,
    /// Service provider name.
    pub provider_name: String,
    /// Service name.
    pub service_name: String,
}

impl ServiceDescriptor {
    /// Minimum payload: type byte plus two empty names.
    pub const MIN_LENGTH: usize = 3;

    /// Parse a service descriptor from its payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_LENGTH {
            return Err(too_short(tag::SERVICE, data.len(), Self::MIN_LENGTH));
        }

        let service_type = data[0];
        let provider_name_length = data[1] as usize;

        let service_name_offset = 2 + provider_name_length;
        if data.len() < service_name_offset + 1 {
            return Err(too_short(tag::SERVICE, data.len(), service_name_offset + 1));
        }
        let provider_name = decode_dvb_string(&data[2..service_name_offset]);

        let service_name_length = data[service_name_offset] as usize;
        let service_name_end = service_name_offset + 1 + service_name_length;
        if data.len() < service_name_end {
            return Err(too_short(tag::SERVICE, data.len(), service_name_end));
        }
        let service_name = decode_dvb_string(&data[service_name_offset + 1..service_name_end]);

        Ok(ServiceDescriptor {
            service_type,
            provider_name,
            service_name,
        })
    }

    /// Returns true for radio service types.
    pub fn is_radio(&self) -> bool {
        is_radio_service_type(self.service_type)
    }

    /// Get human-readable service type name.
    pub fn service_type_name(&self) -> &'static str {
        match self.service_type {
            0x01 => "Digital TV",
            0x02 => "Digital Radio",
            0x0A => "Advanced Codec Radio",
            0x0C => "Data Broadcast",
            0x11 => "MPEG-2 HD TV",
            0x16 => "Advanced Codec SD TV",
            0x19 => "Advanced Codec HD TV",
            0x1F => "HEVC TV",
            _ => "Unknown",
        }
    }
}

/// Returns true for the DVB radio service types (0x02 and 0x0A).
pub fn is_radio_service_type(service_type: u8) -> bool {
    matches!(service_type, 0x02 | 0x0A)
}

/// Network name descriptor (0x40).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkNameDescriptor {
    /// Network name.
    pub network_name: String,
}

impl NetworkNameDescriptor {
    /// Parse a network name descriptor.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(NetworkNameDescriptor {
            network_name: decode_dvb_string(data),
        })
    }
}

/// Polarization values of the satellite delivery descriptor.
pub mod polarization {
    pub const LINEAR_HORIZONTAL: u8 = 0;
    pub const LINEAR_VERTICAL: u8 = 1;
    pub const CIRCULAR_LEFT: u8 = 2;
    pub const CIRCULAR_RIGHT: u8 = 3;
}

/// Satellite delivery system descriptor (0x43).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SatelliteDeliveryDescriptor {
    /// Frequency in units of 10 kHz (8 BCD digits).
    pub frequency: u32,
    /// Orbital position in units of 0.1 degree (4 BCD digits).
    pub orbital_position: u16,
    /// West/East flag (true = East).
    pub west_east_flag: bool,
    /// Polarization (2 bits).
    pub polarization: u8,
    /// Roll-off factor (2 bits, DVB-S2 only).
    pub roll_off: u8,
    /// Modulation system (0 = DVB-S, 1 = DVB-S2).
    pub modulation_system: u8,
    /// Modulation type (2 bits).
    pub modulation_type: u8,
    /// Symbol rate in units of 100 symbols/s (7 BCD digits).
    pub symbol_rate: u32,
    /// FEC inner (4 bits).
    pub fec_inner: u8,
}

impl SatelliteDeliveryDescriptor {
    /// Fixed payload length.
    pub const MIN_LENGTH: usize = 11;

    /// Parse a satellite delivery system descriptor.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_LENGTH {
            return Err(too_short(tag::SATELLITE_DELIVERY, data.len(), Self::MIN_LENGTH));
        }

        let frequency = bcd_to_u32(&data[0..4]);
        let orbital_position = bcd_to_u32(&data[4..6]) as u16;

        let flags = data[6];
        let west_east_flag = flags & 0x80 != 0;
        let polarization = (flags >> 5) & 0x03;
        let roll_off = (flags >> 3) & 0x03;
        let modulation_system = (flags >> 2) & 0x01;
        let modulation_type = flags & 0x03;

        // 7 BCD digits: three full bytes and the upper nibble of the fourth
        let symbol_rate = bcd_to_u32(&data[7..10]) * 10 + (data[10] >> 4) as u32;
        let fec_inner = data[10] & 0x0F;

        Ok(SatelliteDeliveryDescriptor {
            frequency,
            orbital_position,
            west_east_flag,
            polarization,
            roll_off,
            modulation_system,
            modulation_type,
            symbol_rate,
            fec_inner,
        })
    }

    /// Frequency in kHz.
    pub fn frequency_khz(&self) -> u32 {
        self.frequency * 10
    }

    /// Symbol rate in symbols/s.
    pub fn symbol_rate_sps(&self) -> u32 {
        self.symbol_rate * 100
    }

    /// Returns true for DVB-S2 carriers.
    pub fn is_dvb_s2(&self) -> bool {
        self.modulation_system == 1
    }

    /// Get human-readable polarization name.
    pub fn polarization_name(&self) -> &'static str {
        match self.polarization {
            polarization::LINEAR_HORIZONTAL => "H",
            polarization::LINEAR_VERTICAL => "V",
            polarization::CIRCULAR_LEFT => "L",
            _ => "R",
        }
    }
}

/// One entry of a service list descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceListEntry {
    /// Service ID.
    pub service_id: u16,
    /// Service type.
    pub service_type: u8,
}

/// Service list descriptor (0x41).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceListDescriptor {
    /// Services in broadcast order.
    pub services: Vec<ServiceListEntry>,
}

impl ServiceListDescriptor {
    /// Parse a service list descriptor. A trailing partial entry is ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let services = data
            .chunks_exact(3)
            .map(|chunk| ServiceListEntry {
                service_id: read_u16(chunk, 0),
                service_type: chunk[2],
            })
            .collect();

        Ok(ServiceListDescriptor { services })
    }
}

/// One entry of a logical channel descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogicalChannel {
    /// Service ID.
    pub service_id: u16,
    /// Visible service flag.
    pub visible: bool,
    /// Logical channel number (14 bits).
    pub logical_channel_number: u16,
}

/// Logical channel descriptor (0x83).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogicalChannelDescriptor {
    /// Channel numbers in broadcast order.
    pub channels: Vec<LogicalChannel>,
}

impl LogicalChannelDescriptor {
    /// Parse a logical channel descriptor. A trailing partial entry is ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let channels = data
            .chunks_exact(4)
            .map(|chunk| LogicalChannel {
                service_id: read_u16(chunk, 0),
                visible: chunk[2] & 0x80 != 0,
                logical_channel_number: read_u16(chunk, 2) & 0x3FFF,
            })
            .collect();

        Ok(LogicalChannelDescriptor { channels })
    }
}

/// A decoded descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    NetworkName(NetworkNameDescriptor),
    ServiceList(ServiceListDescriptor),
    SatelliteDelivery(SatelliteDeliveryDescriptor),
    Service(ServiceDescriptor),
    LogicalChannel(LogicalChannelDescriptor),
    /// Tag without a parser; the payload was skipped.
    Unknown { tag: u8, length: usize },
}

impl Descriptor {
    /// Dispatch a descriptor payload to the parser for its tag.
    pub fn parse(descriptor_tag: u8, payload: &[u8]) -> Result<Self> {
        let descriptor = match descriptor_tag {
            tag::NETWORK_NAME => Descriptor::NetworkName(NetworkNameDescriptor::parse(payload)?),
            tag::SERVICE_LIST => Descriptor::ServiceList(ServiceListDescriptor::parse(payload)?),
            tag::SATELLITE_DELIVERY => {
                Descriptor::SatelliteDelivery(SatelliteDeliveryDescriptor::parse(payload)?)
            }
            tag::SERVICE => Descriptor::Service(ServiceDescriptor::parse(payload)?),
            tag::LOGICAL_CHANNEL => {
                Descriptor::LogicalChannel(LogicalChannelDescriptor::parse(payload)?)
            }
            other => Descriptor::Unknown {
                tag: other,
                length: payload.len(),
            },
        };
        Ok(descriptor)
    }
}

/// Parse every descriptor of a descriptor loop.
///
/// The loop must be exactly covered by its descriptors; a descriptor whose
/// declared length overruns the loop fails with `TruncatedSection`.
pub fn parse_descriptor_loop(data: &[u8]) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let header = take(data, offset, 2)?;
        let descriptor_tag = header[0];
        let length = header[1] as usize;
        offset += 2;

        let payload = take(data, offset, length)?;
        offset += length;

        descriptors.push(Descriptor::parse(descriptor_tag, payload)?);
    }

    Ok(descriptors)
}

fn too_short(descriptor_tag: u8, length: usize, minimum: usize) -> DecodeError {
    DecodeError::DescriptorTooShort {
        tag: descriptor_tag,
        length,
        minimum,
    }
}

/// Convert BCD bytes to u32.
pub(crate) fn bcd_to_u32(data: &[u8]) -> u32 {
    let mut result = 0u32;
    for &byte in data {
        let high = (byte >> 4) as u32;
        let low = (byte & 0x0F) as u32;
        result = result * 100 + high * 10 + low;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_service_descriptor() {
        let data = [
            0x01, // service_type = Digital TV
            0x04, // provider_name_length = 4
            b'T', b'E', b'S', b'T', // provider_name = "TEST"
            0x07, // service_name_length = 7
            b'C', b'H', b' ', b'N', b'A', b'M', b'E', // service_name = "CH NAME"
            0xFF, 0xFF, // trailing bytes are ignored
        ];

        let desc = ServiceDescriptor::parse(&data).unwrap();
        assert_eq!(desc.service_type, 0x01);
        assert_eq!(desc.provider_name, "TEST");
        assert_eq!(desc.service_name, "CH NAME");
        assert!(!desc.is_radio());
    }

    #[test]
    fn test_service_descriptor_too_short() {
        assert_eq!(
            ServiceDescriptor::parse(&[0x01, 0x00]),
            Err(DecodeError::DescriptorTooShort {
                tag: tag::SERVICE,
                length: 2,
                minimum: 3,
            })
        );

        // Provider name length points past the payload
        assert!(matches!(
            ServiceDescriptor::parse(&[0x01, 0x05, b'A', b'B']),
            Err(DecodeError::DescriptorTooShort { tag: tag::SERVICE, .. })
        ));
    }

    #[test]
    fn test_parse_satellite_delivery() {
        let data = [
            0x01, 0x17, 0x27, 0x50, // 11.727500 GHz
            0x01, 0x92, // 19.2 degrees
            0xBD, // east=1, pol=01 (V), roll_off=11, S2=1, modulation=01
            0x02, 0x75, 0x00, 0x03, // 27.5000 Msym/s, FEC 3
        ];

        let desc = SatelliteDeliveryDescriptor::parse(&data).unwrap();
        assert_eq!(desc.frequency, 1_172_750);
        assert_eq!(desc.frequency_khz(), 11_727_500);
        assert_eq!(desc.orbital_position, 192);
        assert!(desc.west_east_flag);
        assert_eq!(desc.polarization, polarization::LINEAR_VERTICAL);
        assert_eq!(desc.polarization_name(), "V");
        assert_eq!(desc.roll_off, 3);
        assert_eq!(desc.modulation_system, 1);
        assert!(desc.is_dvb_s2());
        assert_eq!(desc.modulation_type, 1);
        assert_eq!(desc.symbol_rate, 275_000);
        assert_eq!(desc.symbol_rate_sps(), 27_500_000);
        assert_eq!(desc.fec_inner, 3);
    }

    #[test]
    fn test_satellite_delivery_too_short() {
        assert!(matches!(
            SatelliteDeliveryDescriptor::parse(&[0u8; 10]),
            Err(DecodeError::DescriptorTooShort { minimum: 11, .. })
        ));
    }

    #[test]
    fn test_parse_lists() {
        let services = ServiceListDescriptor::parse(&[0x00, 0x01, 0x01, 0x00, 0x02, 0x02, 0x00])
            .unwrap();
        assert_eq!(
            services.services,
            vec![
                ServiceListEntry { service_id: 1, service_type: 0x01 },
                ServiceListEntry { service_id: 2, service_type: 0x02 },
            ]
        );

        let channels = LogicalChannelDescriptor::parse(&[0x00, 0x01, 0xFC, 0x05]).unwrap();
        assert_eq!(
            channels.channels,
            vec![LogicalChannel {
                service_id: 1,
                visible: true,
                logical_channel_number: 0x3C05,
            }]
        );
    }

    #[test]
    fn test_parse_descriptor_loop() {
        let data = [
            0x40, 0x03, b'N', b'e', b't', // network name
            0x99, 0x02, 0xAA, 0xBB, // unknown tag, skipped
        ];

        let descriptors = parse_descriptor_loop(&data).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(
            descriptors[0],
            Descriptor::NetworkName(NetworkNameDescriptor {
                network_name: "Net".to_string()
            })
        );
        assert_eq!(descriptors[1], Descriptor::Unknown { tag: 0x99, length: 2 });
    }

    #[test]
    fn test_descriptor_loop_overrun() {
        let data = [0x40, 0x05, b'N', b'e'];
        assert!(matches!(
            parse_descriptor_loop(&data),
            Err(DecodeError::TruncatedSection { .. })
        ));
    }

    #[test]
    fn test_bcd_to_u32() {
        assert_eq!(bcd_to_u32(&[0x12, 0x34]), 1234);
        assert_eq!(bcd_to_u32(&[0x00, 0x01]), 1);
        assert_eq!(bcd_to_u32(&[0x99, 0x99]), 9999);
    }
}
