// ============================================================
// ENCODING CODEC
// ============================================================
// Decode source bytes and re-encode exports in the original charset

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};

use super::detector::DetectedEncoding;
use crate::domain::error::{Result, SyncError};

/// Decode file bytes, skipping the BOM, failing on malformed sequences.
pub fn decode(bytes: &[u8], detected: &DetectedEncoding) -> Result<String> {
    let body = &bytes[detected.bom_len.min(bytes.len())..];
    detected
        .encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| text.into_owned())
        .ok_or_else(|| {
            SyncError::Encoding(format!(
                "content is not valid {}",
                detected.encoding.name()
            ))
        })
}

/// Encode text in the given charset, optionally prefixed with its BOM.
///
/// Characters the target charset cannot represent are an error rather than
/// numeric character references, which legacy consumers would not decode.
pub fn encode(text: &str, encoding: &'static Encoding, with_bom: bool) -> Result<Vec<u8>> {
    if encoding == UTF_16LE || encoding == UTF_16BE {
        return Ok(encode_utf16(text, encoding == UTF_16LE, with_bom));
    }

    let (encoded, actual, unmappable) = encoding.encode(text);
    if unmappable {
        return Err(SyncError::Encoding(format!(
            "text contains characters not representable in {}",
            encoding.name()
        )));
    }
    if actual != encoding {
        return Err(SyncError::Encoding(format!(
            "{} cannot be used as an output encoding",
            encoding.name()
        )));
    }

    let mut out = Vec::with_capacity(encoded.len() + 3);
    if with_bom {
        out.extend_from_slice(bom_for(encoding));
    }
    out.extend_from_slice(&encoded);
    Ok(out)
}

/// Byte-order mark for an encoding, empty when it has none.
pub fn bom_for(encoding: &'static Encoding) -> &'static [u8] {
    if encoding == UTF_16LE {
        &[0xFF, 0xFE]
    } else if encoding == UTF_16BE {
        &[0xFE, 0xFF]
    } else if encoding == encoding_rs::UTF_8 {
        &[0xEF, 0xBB, 0xBF]
    } else {
        &[]
    }
}

fn encode_utf16(text: &str, little_endian: bool, with_bom: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2 + 2);
    if with_bom {
        out.extend_from_slice(if little_endian {
            &[0xFF, 0xFE]
        } else {
            &[0xFE, 0xFF]
        });
    }
    for unit in text.encode_utf16() {
        let bytes = if little_endian {
            unit.to_le_bytes()
        } else {
            unit.to_be_bytes()
        };
        out.extend_from_slice(&bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::encoding::detect_encoding;
    use encoding_rs::{GBK, UTF_8};

    #[test]
    fn test_utf16le_with_bom() {
        let bytes = encode("<a>技能</a>", UTF_16LE, true).unwrap();
        assert_eq!(&bytes[..4], &[0xFF, 0xFE, b'<', 0]);

        let detected = detect_encoding(&bytes, GBK);
        assert_eq!(decode(&bytes, &detected).unwrap(), "<a>技能</a>");
    }

    #[test]
    fn test_gbk_round_trip() {
        let bytes = encode("<a>中文</a>", GBK, false).unwrap();
        assert_ne!(bytes, "<a>中文</a>".as_bytes());
        let detected = detect_encoding(&bytes, GBK);
        assert_eq!(detected.name(), "GBK");
        assert_eq!(decode(&bytes, &detected).unwrap(), "<a>中文</a>");
    }

    #[test]
    fn test_unmappable_is_an_error() {
        let result = encode("<a>技</a>", encoding_rs::WINDOWS_1252, false);
        assert!(matches!(result, Err(SyncError::Encoding(_))));
    }

    #[test]
    fn test_utf8_bom_prefix() {
        let bytes = encode("<a/>", UTF_8, true).unwrap();
        assert_eq!(&bytes[..3], &[0xEF, 0xBB, 0xBF]);
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        let detected = DetectedEncoding {
            encoding: UTF_8,
            has_bom: false,
            bom_len: 0,
        };
        assert!(decode(&[0xC3, 0x28], &detected).is_err());
    }
}
