pub mod exporter;
pub mod parser;

use thiserror::Error;

pub use exporter::render_text_pdf;
pub use parser::{truncate_chars, DocumentFormat, DocumentParser, Extraction};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read PDF: {0}")]
    PdfRead(String),

    #[error("Failed to write PDF: {0}")]
    PdfWrite(String),

    #[error("Uploaded file is empty")]
    EmptyFile,
}
