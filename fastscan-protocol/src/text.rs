//! DVB string decoding (EN 300 468 Annex A).
//!
//! The first byte of a text field may select a character table. Without a
//! selector the default table (ISO/IEC 6937) applies; it is approximated here
//! by Latin-1, which agrees with it on every printable character that operator
//! channel names use in practice.

use encoding_rs::{
    Encoding, ISO_8859_10, ISO_8859_13, ISO_8859_14, ISO_8859_15, ISO_8859_16, ISO_8859_2,
    ISO_8859_3, ISO_8859_4, ISO_8859_5, ISO_8859_6, ISO_8859_7, ISO_8859_8, UTF_16BE,
    WINDOWS_1252, WINDOWS_1254, WINDOWS_874,
};

/// Character table selected by the leading bytes of a DVB string.
fn select_table(data: &[u8]) -> (usize, &'static Encoding) {
    match data.first().copied() {
        Some(0x01) => (1, ISO_8859_5),
        Some(0x02) => (1, ISO_8859_6),
        Some(0x03) => (1, ISO_8859_7),
        Some(0x04) => (1, ISO_8859_8),
        Some(0x05) => (1, WINDOWS_1254),
        Some(0x06) => (1, ISO_8859_10),
        Some(0x07) => (1, WINDOWS_874),
        Some(0x09) => (1, ISO_8859_13),
        Some(0x0A) => (1, ISO_8859_14),
        Some(0x0B) => (1, ISO_8859_15),
        Some(0x10) if data.len() >= 3 => (3, iso_8859_part(data[2])),
        Some(0x11) => (1, UTF_16BE),
        Some(0x15) => (1, encoding_rs::UTF_8),
        // Followed by an encoding_type_id byte
        Some(0x1F) if data.len() >= 2 => (2, WINDOWS_1252),
        Some(b) if b < 0x20 => (1, WINDOWS_1252),
        _ => (0, WINDOWS_1252),
    }
}

fn iso_8859_part(part: u8) -> &'static Encoding {
    match part {
        0x02 => ISO_8859_2,
        0x03 => ISO_8859_3,
        0x04 => ISO_8859_4,
        0x05 => ISO_8859_5,
        0x06 => ISO_8859_6,
        0x07 => ISO_8859_7,
        0x08 => ISO_8859_8,
        0x09 => WINDOWS_1254,
        0x0A => ISO_8859_10,
        0x0B => WINDOWS_874,
        0x0D => ISO_8859_13,
        0x0E => ISO_8859_14,
        0x0F => ISO_8859_15,
        0x10 => ISO_8859_16,
        _ => WINDOWS_1252,
    }
}

/// Decode a DVB text field to UTF-8.
pub fn decode_dvb_string(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }

    let (start, encoding) = select_table(data);
    let body = &data[start..];

    if encoding == encoding_rs::UTF_8 || encoding == UTF_16BE {
        let (text, _) = encoding.decode_without_bom_handling(body);
        return text.into_owned();
    }

    // Single-byte tables reserve 0x80..=0x9F for control codes.
    let filtered: Vec<u8> = body
        .iter()
        .filter_map(|&b| match b {
            0x8A => Some(b'\n'),
            0x80..=0x9F => None,
            _ => Some(b),
        })
        .collect();

    let (text, _) = encoding.decode_without_bom_handling(&filtered);
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        assert_eq!(decode_dvb_string(b"NPO 1 HD"), "NPO 1 HD");
        assert_eq!(decode_dvb_string(&[b'T', b'V', 0xE9]), "TV\u{e9}");
    }

    #[test]
    fn test_control_codes() {
        // Emphasis on/off around the text, CR/LF in the middle
        let data = [0x86, b'A', 0x87, 0x8A, b'B'];
        assert_eq!(decode_dvb_string(&data), "A\nB");
    }

    #[test]
    fn test_table_selectors() {
        // ISO 8859-5 (Cyrillic): 0xB0 is U+0410
        assert_eq!(decode_dvb_string(&[0x01, 0xB0]), "\u{410}");
        // Explicit ISO 8859-2 selector
        assert_eq!(decode_dvb_string(&[0x10, 0x00, 0x02, 0xA3]), "\u{141}");
        // UTF-8 selector
        assert_eq!(decode_dvb_string(&[0x15, 0xC3, 0xA9]), "\u{e9}");
        assert_eq!(decode_dvb_string(&[]), "");
    }

    #[test]
    fn test_encoding_type_id_not_decoded() {
        assert_eq!(decode_dvb_string(&[0x1F, 0x41, b'B', b'B', b'C']), "BBC");
        assert_eq!(decode_dvb_string(&[0x1F]), "");
    }
}
