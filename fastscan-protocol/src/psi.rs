//! Long section framing shared by both Fast Scan tables.
//!
//! Every Fast Scan section uses the DVB long section syntax:
//!
//! ```text
//! +----------+---------------+------------+---------+--------+---------+---------+-------+
//! | table_id | section_length| table_id   | version | sect.  | last    | payload | CRC32 |
//! |          | (12 bits)     | extension  | / cni   | number | section |         |       |
//! +----------+---------------+------------+---------+--------+---------+---------+-------+
//! |  1 byte  |    2 bytes    |  2 bytes   | 1 byte  | 1 byte | 1 byte  |   ...   |   4   |
//! ```

use crate::error::{DecodeError, Result};

/// Size of the long section header (up to and including `last_section_number`).
pub const LONG_HEADER_SIZE: usize = 8;

/// Size of the trailing CRC32.
pub const CRC_SIZE: usize = 4;

/// Largest section a Fast Scan table may carry.
pub const MAX_SECTION_SIZE: usize = 4096;

/// Long section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator.
    pub section_syntax_indicator: bool,
    /// Section length (12 bits), counted from the byte after the length field.
    pub section_length: u16,
    /// Table ID extension (operator network id for Fast Scan).
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

impl SectionHeader {
    /// Peek the header of a raw section without checking its CRC.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < LONG_HEADER_SIZE {
            return Err(DecodeError::TruncatedSection {
                needed: LONG_HEADER_SIZE,
                available: data.len(),
            });
        }

        Ok(SectionHeader {
            table_id: data[0],
            section_syntax_indicator: data[1] & 0x80 != 0,
            section_length: read_length(data, 1),
            table_id_extension: read_u16(data, 3),
            version_number: (data[5] >> 1) & 0x1F,
            current_next_indicator: data[5] & 0x01 != 0,
            section_number: data[6],
            last_section_number: data[7],
        })
    }

    /// Total section length including the 3-byte prefix and the CRC.
    pub fn total_length(&self) -> usize {
        3 + self.section_length as usize
    }

    /// Number of sections the table is declared to span.
    pub fn section_count(&self) -> usize {
        self.last_section_number as usize + 1
    }
}

/// A long section whose CRC has been checked.
#[derive(Debug, Clone)]
pub struct LongSection<'a> {
    /// Section header.
    pub header: SectionHeader,
    /// Payload (after header, before CRC).
    pub payload: &'a [u8],
    /// Stored CRC32 value.
    pub crc32: u32,
}

impl<'a> LongSection<'a> {
    /// Frame a raw section and verify its checksum.
    ///
    /// Bytes past `section_length` are ignored so that callers may hand in
    /// fixed-size buffers.
    pub fn parse(data: &'a [u8], verifier: &dyn ChecksumVerifier) -> Result<Self> {
        let header = SectionHeader::parse(data)?;

        let total_length = header.total_length();
        if total_length < LONG_HEADER_SIZE + CRC_SIZE {
            return Err(DecodeError::TruncatedSection {
                needed: LONG_HEADER_SIZE + CRC_SIZE,
                available: total_length,
            });
        }
        if data.len() < total_length {
            return Err(DecodeError::TruncatedSection {
                needed: total_length,
                available: data.len(),
            });
        }

        let crc_offset = total_length - CRC_SIZE;
        let crc32 = u32::from_be_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);

        if !verifier.verify(&data[..total_length]) {
            return Err(DecodeError::ChecksumInvalid { stored: crc32 });
        }

        Ok(LongSection {
            header,
            payload: &data[LONG_HEADER_SIZE..crc_offset],
            crc32,
        })
    }
}

/// Checksum primitive applied to a complete section (CRC included).
pub trait ChecksumVerifier {
    /// Returns true if the section is intact.
    fn verify(&self, section: &[u8]) -> bool;
}

/// MPEG-2 CRC32 check: the CRC over a section including its stored CRC is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mpeg2Crc;

impl ChecksumVerifier for Mpeg2Crc {
    fn verify(&self, section: &[u8]) -> bool {
        crc32_mpeg2(section) == 0
    }
}

/// Accepts every section. Used for subscriptions with CRC checking disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipChecksum;

impl ChecksumVerifier for SkipChecksum {
    fn verify(&self, _section: &[u8]) -> bool {
        true
    }
}

/// Calculate CRC32 for MPEG-2 (polynomial 0x04C11DB7).
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    static CRC_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u32) << 24;
            let mut j = 0;
            while j < 8 {
                if crc & 0x80000000 != 0 {
                    crc = (crc << 1) ^ 0x04C11DB7;
                } else {
                    crc <<= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let index = ((crc >> 24) ^ byte as u32) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc
}

/// Read a big-endian u16.
pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    ((data[offset] as u16) << 8) | data[offset + 1] as u16
}

/// Read a 12-bit length field (upper nibble reserved).
pub(crate) fn read_length(data: &[u8], offset: usize) -> u16 {
    ((data[offset] as u16 & 0x0F) << 8) | data[offset + 1] as u16
}

/// Read a 13-bit PID field (upper three bits reserved).
pub(crate) fn read_pid(data: &[u8], offset: usize) -> u16 {
    ((data[offset] as u16 & 0x1F) << 8) | data[offset + 1] as u16
}

/// Borrow `len` bytes at `offset`, failing if the slice would overrun `data`.
pub(crate) fn take(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset + len;
    if end > data.len() {
        return Err(DecodeError::TruncatedSection {
            needed: end,
            available: data.len(),
        });
    }
    Ok(&data[offset..end])
}
