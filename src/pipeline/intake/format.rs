use std::path::Path;

use serde::{Deserialize, Serialize};

/// Broad file categories we handle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileCategory {
    Pdf,
    PlainText,
    /// Raster image: no text layer, cannot be read without OCR.
    Image,
    Unsupported,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::PlainText => "plain_text",
            Self::Image => "image",
            Self::Unsupported => "unsupported",
        }
    }

    /// Whether a text layer can be read from this category.
    pub fn has_text_layer(&self) -> bool {
        matches!(self, Self::Pdf | Self::PlainText)
    }
}

/// Result of format detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDetection {
    pub mime_type: String,
    pub category: FileCategory,
    pub file_size_bytes: u64,
}

pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100MB

/// Sidecar extensions: metadata files that travel with a primary document.
pub const SIDECAR_EXTENSIONS: &[&str] = &["json", "xml", "txt"];

/// Detect file format from magic bytes, never from the extension.
pub fn detect_format(bytes: &[u8]) -> FormatDetection {
    let file_size = bytes.len() as u64;

    if file_size > MAX_FILE_SIZE {
        return FormatDetection {
            mime_type: "unknown".into(),
            category: FileCategory::Unsupported,
            file_size_bytes: file_size,
        };
    }

    let (mime_type, category) = match &bytes[..bytes.len().min(12)] {
        // PDF: starts with %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => ("application/pdf", FileCategory::Pdf),
        // JPEG: starts with FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => ("image/jpeg", FileCategory::Image),
        // PNG: starts with 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => ("image/png", FileCategory::Image),
        // TIFF: little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => {
            ("image/tiff", FileCategory::Image)
        }
        _ if is_likely_text(bytes) => ("text/plain", FileCategory::PlainText),
        _ => ("application/octet-stream", FileCategory::Unsupported),
    };

    FormatDetection {
        mime_type: mime_type.to_string(),
        category,
        file_size_bytes: file_size,
    }
}

/// Mostly printable characters in the first 4KB. Latin-1 bytes count as
/// printable so legacy exports are not rejected.
fn is_likely_text(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(4096)];
    if head.is_empty() {
        return false;
    }
    let printable = head
        .iter()
        .filter(|&&b| b >= 0x20 || matches!(b, b'\n' | b'\r' | b'\t' | 0x0C))
        .filter(|&&b| b != 0x7F)
        .count();
    printable as f64 / head.len() as f64 > 0.80
}

/// Sanitize a filename: strip path components, limit length
pub fn sanitize_filename(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");

    let clean: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .take(255)
        .collect();

    if clean.is_empty() {
        "document".to_string()
    } else {
        clean
    }
}

/// Lowercased extension, if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

/// File name without its extension.
pub fn stem_of(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn is_sidecar_extension(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| SIDECAR_EXTENSIONS.contains(&ext.as_str()))
}
