// ============================================================
// ENCODING INFRASTRUCTURE LAYER
// ============================================================
// BOM/charset sniffing plus lossless decode and encode

mod codec;
mod detector;

pub use codec::{bom_for, decode, encode};
pub use detector::{detect_encoding, encoding_for_name, DetectedEncoding};

use std::path::Path;

use crate::domain::error::{Result, SyncError};

/// Raw bytes of a source file, rejecting missing or zero-byte files.
pub fn read_source(path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(SyncError::EmptySource(format!(
            "{} does not exist",
            path.display()
        )));
    }
    let bytes = std::fs::read(path)
        .map_err(|e| SyncError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    if bytes.is_empty() {
        return Err(SyncError::EmptySource(format!(
            "{} is zero bytes",
            path.display()
        )));
    }
    Ok(bytes)
}

/// A source file decoded into text together with its on-disk charset.
#[derive(Debug, Clone)]
pub struct DecodedSource {
    pub text: String,
    pub detected: DetectedEncoding,
}

pub fn read_and_decode(path: &Path, legacy: &'static encoding_rs::Encoding) -> Result<DecodedSource> {
    let bytes = read_source(path)?;
    decode_bytes(&bytes, legacy)
}

pub fn decode_bytes(bytes: &[u8], legacy: &'static encoding_rs::Encoding) -> Result<DecodedSource> {
    let detected = detect_encoding(bytes, legacy);
    let text = decode(bytes, &detected)?;
    Ok(DecodedSource { text, detected })
}
