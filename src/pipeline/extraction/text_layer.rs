//! Page text from document bytes.
//!
//! Each page carries its full text and the text of its top 75%. Field
//! extraction reads only the upper region: the bottom quarter of both slip
//! and invoice templates holds barcodes, receipt stubs and carrier blocks that
//! repeat numbers from elsewhere on the page.
//!
//! PDFs are read through PDFium's text layer (no rendering). The `Pdfium`
//! handle is loaded per call because the upstream type is `!Send`; the OS
//! caches the library load.

use pdfium_render::prelude::*;
use tracing::debug;

use super::sanitize::sanitize_extracted_text;
use super::ExtractionError;
use crate::pipeline::intake::format::{detect_format, FileCategory};

/// Fraction of the page height, from the top, that field extraction reads.
pub const UPPER_REGION_FRACTION: f32 = 0.75;

/// Page separator in plain-text documents.
const FORM_FEED: char = '\x0c';

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageText {
    /// Whole page.
    pub text: String,
    /// Top 75% of the page.
    pub upper: String,
}

impl PageText {
    pub fn new(text: impl Into<String>, upper: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            upper: upper.into(),
        }
    }
}

/// Turns document bytes into per-page text.
pub trait TextLayer: Send + Sync {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError>;
}

/// Joined upper-region text of every page.
pub fn upper_text(pages: &[PageText]) -> String {
    pages.iter().map(|p| p.upper.as_str()).collect::<Vec<_>>().join("\n")
}

/// Joined full text of every page.
pub fn full_text(pages: &[PageText]) -> String {
    pages.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("\n")
}

// ── Plain text ──────────────────────────────────────────────

/// Plain-text documents. Pages are split on form feeds; the upper region is
/// the first 75% of each page's lines.
pub struct PlainTextLayer;

impl TextLayer for PlainTextLayer {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError> {
        let decoded = decode_text(bytes);
        let pages: Vec<PageText> = decoded
            .split(FORM_FEED)
            .map(|raw| {
                let text = sanitize_extracted_text(raw);
                let upper = upper_lines(&text);
                PageText { text, upper }
            })
            .collect();

        if pages.iter().all(|p| p.text.is_empty()) {
            return Err(ExtractionError::EmptyDocument);
        }
        Ok(pages)
    }
}

/// UTF-8, or Latin-1 when the bytes are not valid UTF-8.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            debug!("Text is not UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

fn upper_lines(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let keep = ((lines.len() as f32) * UPPER_REGION_FRACTION).ceil() as usize;
    lines[..keep.min(lines.len())].join("\n")
}

// ── PDFium ──────────────────────────────────────────────────

/// Digital PDFs through PDFium's native text layer.
pub struct PdfiumTextLayer;

impl PdfiumTextLayer {
    /// Verify the PDFium library is loadable (fail-fast).
    ///
    /// Discovery order:
    /// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path to library file)
    /// 2. Alongside the running executable
    /// 3. System library search paths
    pub fn new() -> Result<Self, ExtractionError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

impl TextLayer for PdfiumTextLayer {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(map_load_error)?;

        let page_count = document.pages().len();
        if page_count == 0 {
            return Err(ExtractionError::EmptyDocument);
        }

        let mut pages = Vec::with_capacity(page_count as usize);
        for (idx, page) in document.pages().iter().enumerate() {
            let text = page.text().map_err(|e| ExtractionError::PdfText {
                page: idx + 1,
                reason: e.to_string(),
            })?;
            let (bottom, top) = upper_region_bounds(page.height().value);
            let region = PdfRect::new_from_values(bottom, 0.0, top, page.width().value);

            pages.push(PageText {
                text: sanitize_extracted_text(&text.all()),
                upper: sanitize_extracted_text(&text.inside_rect(region)),
            });
        }

        debug!(pages = pages.len(), "Read PDF text layer");
        Ok(pages)
    }
}

/// Vertical bounds (bottom, top) of the upper region in PDF points. PDF
/// coordinates grow upwards from the bottom edge.
pub fn upper_region_bounds(page_height: f32) -> (f32, f32) {
    let height = page_height.max(0.0);
    (height * (1.0 - UPPER_REGION_FRACTION), height)
}

/// Load the PDFium dynamic library.
fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    // 1. Explicit path via env var
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            ExtractionError::PdfiumUnavailable(format!("Failed to load PDFium from {path}: {e}"))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    // 2. Alongside the executable (and a lib/ next to it)
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [exe_dir.to_path_buf(), exe_dir.join("lib")];
            for dir in &candidates {
                let lib_path =
                    Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    // 3. System library
    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        ExtractionError::PdfiumUnavailable(format!(
            "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// Map PDF load errors, detecting encrypted PDFs.
fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfParsing(msg)
    }
}

// ── Dispatch ────────────────────────────────────────────────

/// Picks the text layer from the magic bytes.
pub struct DefaultTextLayer {
    plain: PlainTextLayer,
    pdf: PdfiumTextLayer,
}

impl DefaultTextLayer {
    /// Does not touch PDFium until a PDF arrives.
    pub fn new() -> Self {
        Self {
            plain: PlainTextLayer,
            pdf: PdfiumTextLayer,
        }
    }
}

impl Default for DefaultTextLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextLayer for DefaultTextLayer {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError> {
        let format = detect_format(bytes);
        match format.category {
            FileCategory::Pdf => self.pdf.pages(bytes),
            FileCategory::PlainText => self.plain.pages(bytes),
            FileCategory::Image | FileCategory::Unsupported => {
                Err(ExtractionError::UnsupportedFormat(format.mime_type))
            }
        }
    }
}
