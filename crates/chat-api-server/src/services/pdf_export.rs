use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::document::{render_text_pdf, DocumentError};

/// Renders text to single-page PDFs under the export directory.
pub struct PdfExporter {
    export_dir: PathBuf,
}

impl PdfExporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self { export_dir: export_dir.into() }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Writes `{export_dir}/{uuid}.pdf` and returns its path.
    pub async fn export(&self, text: &str) -> Result<PathBuf, DocumentError> {
        let bytes = render_text_pdf(text)?;

        fs::create_dir_all(&self.export_dir).await?;
        let path = self.export_dir.join(format!("{}.pdf", Uuid::new_v4()));
        fs::write(&path, &bytes).await?;

        info!("Exported PDF: {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}
