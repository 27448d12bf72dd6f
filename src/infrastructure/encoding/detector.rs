// ============================================================
// ENCODING DETECTOR
// ============================================================
// Sniff byte-order marks and charset declarations of legacy XML files

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// Bytes inspected when looking for an XML declaration.
const DECLARATION_SNIFF_LEN: usize = 512;

static DECLARED_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*<\?xml[^>]*?\bencoding\s*=\s*["']([A-Za-z0-9._:\-]+)["']"#)
        .expect("static encoding declaration pattern")
});

/// Charset of a source file as found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedEncoding {
    pub encoding: &'static Encoding,
    pub has_bom: bool,
    /// Number of leading BOM bytes to skip before decoding.
    pub bom_len: usize,
}

impl DetectedEncoding {
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }
}

/// Detect the encoding of raw file bytes.
///
/// Order: byte-order mark, BOM-less UTF-16, declared encoding, valid UTF-8,
/// then the configured legacy encoding.
pub fn detect_encoding(bytes: &[u8], legacy: &'static Encoding) -> DetectedEncoding {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        return DetectedEncoding {
            encoding,
            has_bom: true,
            bom_len,
        };
    }

    if bytes.len() >= 2 {
        if bytes[0] == b'<' && bytes[1] == 0 {
            return without_bom(UTF_16LE);
        }
        if bytes[0] == 0 && bytes[1] == b'<' {
            return without_bom(UTF_16BE);
        }
    }

    let utf8_valid = std::str::from_utf8(bytes).is_ok();

    if let Some(declared) = declared_encoding(bytes) {
        // Single-byte-compatible bytes cannot really be UTF-16 whatever the declaration says.
        if declared != UTF_16LE && declared != UTF_16BE {
            if declared == UTF_8 && !utf8_valid {
                tracing::warn!(
                    fallback = legacy.name(),
                    "Declared UTF-8 but bytes are not valid UTF-8, using legacy encoding"
                );
                return without_bom(legacy);
            }
            return without_bom(declared);
        }
    }

    if utf8_valid {
        without_bom(UTF_8)
    } else {
        without_bom(legacy)
    }
}

/// Resolve an encoding name recorded in metadata.
pub fn encoding_for_name(name: &str) -> Option<&'static Encoding> {
    Encoding::for_label(name.trim().as_bytes())
}

fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(DECLARATION_SNIFF_LEN)];
    let captures = DECLARED_ENCODING.captures(head)?;
    let label = captures.get(1)?.as_bytes();
    Encoding::for_label(label)
}

fn without_bom(encoding: &'static Encoding) -> DetectedEncoding {
    DetectedEncoding {
        encoding,
        has_bom: false,
        bom_len: 0,
    }
}
