use encoding_rs::{UTF_8, WINDOWS_1252};
use lopdf::Document as PdfDocument;
use std::path::Path;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use super::DocumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Pdf,
}

impl DocumentFormat {
    /// Format declared by the file extension; `None` for anything unrecognized.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_lowercase();

        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "text" | "md" | "csv" | "log" => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "text",
            Self::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Text(String),
    /// Sentinel for formats we do not read
    Unsupported,
}

pub struct DocumentParser;

impl DocumentParser {
    /// Extract UTF-8 text from raw bytes of the declared format.
    pub fn extract(bytes: &[u8], format: Option<DocumentFormat>) -> Result<Extraction, DocumentError> {
        let Some(format) = format else {
            return Ok(Extraction::Unsupported);
        };

        let text = match format {
            DocumentFormat::Pdf => Self::parse_pdf(bytes)?,
            DocumentFormat::PlainText => Self::decode_text(bytes),
        };

        debug!("Extracted {} characters ({})", text.len(), format.as_str());
        Ok(Extraction::Text(text))
    }

    /// Per-page text in page order, one line break between pages.
    fn parse_pdf(bytes: &[u8]) -> Result<String, DocumentError> {
        let doc = PdfDocument::load_mem(bytes).map_err(|e| DocumentError::PdfRead(e.to_string()))?;
        let pages = doc.get_pages();

        let mut page_texts = Vec::with_capacity(pages.len());
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => page_texts.push(text.trim_end_matches(['\n', '\r']).to_string()),
                Err(e) => {
                    warn!("Failed to extract text from page {}: {}", page_num, e);
                    page_texts.push(String::new());
                }
            }
        }

        Ok(page_texts.join("\n"))
    }

    /// UTF-8 (BOM aware); bytes that are not valid UTF-8 are read as Windows-1252.
    fn decode_text(bytes: &[u8]) -> String {
        let (text, _, had_errors) = UTF_8.decode(bytes);
        if !had_errors {
            return text.into_owned();
        }

        let (text, _, _) = WINDOWS_1252.decode(bytes);
        text.into_owned()
    }
}

/// Cut `text` to at most `budget` user-perceived characters.
/// Returns the kept prefix and whether anything was dropped.
pub fn truncate_chars(text: &str, budget: usize) -> (&str, bool) {
    match text.grapheme_indices(true).nth(budget) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}
