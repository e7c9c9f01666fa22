use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::{DocumentError, DocumentFormat, DocumentParser, Extraction};

/// Result of accepting an uploaded file
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub format: Option<DocumentFormat>,
    pub extraction: Extraction,
    /// Set when a known format could not be read; the file is still stored
    pub extraction_error: Option<String>,
}

/// Stores uploads under generated names and extracts their text.
pub struct DocumentService {
    upload_dir: PathBuf,
}

impl DocumentService {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self { upload_dir: upload_dir.into() }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Store then extract. Unknown formats and unreadable files are stored
    /// and reported as [`Extraction::Unsupported`].
    pub async fn process_upload(&self, filename: &str, bytes: &[u8]) -> Result<StoredUpload, DocumentError> {
        let path = self.store_upload(filename, bytes).await?;
        let format = DocumentFormat::from_filename(filename);

        let (extraction, extraction_error) = match DocumentParser::extract(bytes, format) {
            Ok(extraction) => (extraction, None),
            Err(e) => {
                warn!("Stored {} but could not extract text: {}", path.display(), e);
                (Extraction::Unsupported, Some(e.to_string()))
            }
        };

        Ok(StoredUpload { path, format, extraction, extraction_error })
    }

    /// Extract without storing.
    pub fn read_text(&self, filename: &str, bytes: &[u8]) -> Result<Extraction, DocumentError> {
        if bytes.is_empty() {
            return Err(DocumentError::EmptyFile);
        }
        DocumentParser::extract(bytes, DocumentFormat::from_filename(filename))
    }

    /// Writes `{upload_dir}/{uuid}_{basename}`.
    pub async fn store_upload(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, DocumentError> {
        if bytes.is_empty() {
            return Err(DocumentError::EmptyFile);
        }

        fs::create_dir_all(&self.upload_dir).await?;
        let path = self
            .upload_dir
            .join(format!("{}_{}", Uuid::new_v4(), base_name(filename)));
        fs::write(&path, bytes).await?;

        info!("Stored upload: {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

/// Client-supplied names may carry either path separator.
fn base_name(filename: &str) -> &str {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    match name {
        "" | "." | ".." => {
            debug!("Upload without a usable filename, using placeholder");
            "upload"
        }
        name => name,
    }
}
