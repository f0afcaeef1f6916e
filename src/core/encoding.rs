//! CW-002: Source-byte text decoding.
//!
//! Jobs name their encoding as a WHATWG-style label ("utf-8", "utf-16le",
//! "latin-1"). Decoding failures are per-unit, reported by the engine as an
//! excluded unit rather than a job failure.

use std::fmt;

/// Recognized text encodings for source bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    Ascii,
}

impl TextEncoding {
    /// Parse an encoding label. Case-insensitive; hyphens optional.
    pub fn parse(label: &str) -> Result<Self, String> {
        let norm: String = label
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect();
        match norm.as_str() {
            "utf8" => Ok(Self::Utf8),
            // Bare "utf16" follows the platform convention: little-endian
            "utf16" | "utf16le" => Ok(Self::Utf16Le),
            "utf16be" => Ok(Self::Utf16Be),
            "latin1" | "iso88591" => Ok(Self::Latin1),
            "ascii" | "usascii" => Ok(Self::Ascii),
            _ => Err(format!("unknown encoding label: {}", label)),
        }
    }

    /// Decode raw bytes into a string, stripping a leading BOM if present.
    pub fn decode(self, bytes: &[u8]) -> Result<String, String> {
        match self {
            Self::Utf8 => {
                let bytes = strip_prefix(bytes, &[0xEF, 0xBB, 0xBF]);
                String::from_utf8(bytes.to_vec()).map_err(|e| format!("invalid UTF-8: {}", e))
            }
            Self::Utf16Le => {
                let bytes = strip_prefix(bytes, &[0xFF, 0xFE]);
                decode_utf16(bytes, u16::from_le_bytes)
            }
            Self::Utf16Be => {
                let bytes = strip_prefix(bytes, &[0xFE, 0xFF]);
                decode_utf16(bytes, u16::from_be_bytes)
            }
            Self::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            Self::Ascii => {
                if let Some(bad) = bytes.iter().position(|&b| b > 0x7F) {
                    return Err(format!("non-ASCII byte 0x{:02x} at offset {}", bytes[bad], bad));
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8 => write!(f, "utf-8"),
            Self::Utf16Le => write!(f, "utf-16le"),
            Self::Utf16Be => write!(f, "utf-16be"),
            Self::Latin1 => write!(f, "latin-1"),
            Self::Ascii => write!(f, "us-ascii"),
        }
    }
}

fn strip_prefix<'a>(bytes: &'a [u8], bom: &[u8]) -> &'a [u8] {
    bytes.strip_prefix(bom).unwrap_or(bytes)
}

fn decode_utf16(bytes: &[u8], from_bytes: fn([u8; 2]) -> u16) -> Result<String, String> {
    if bytes.len() % 2 != 0 {
        return Err(format!("odd byte length {} for UTF-16", bytes.len()));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| from_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| format!("invalid UTF-16: {}", e))
}
