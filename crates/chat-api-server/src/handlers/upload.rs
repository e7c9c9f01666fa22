use axum::{
    body::Bytes,
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::document::Extraction;
use crate::services::DocumentService;
use crate::utils::error::ApiError;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file: String,
    pub supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    /// Characters of extracted text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,
}

/// File part plus any plain text fields of a multipart form
pub(crate) struct UploadForm {
    pub filename: String,
    pub bytes: Bytes,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    /// Non-blank text field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Reads the first part named in `file_fields` as the file; every other
/// part is kept as a text field.
pub(crate) async fn read_form(mut multipart: Multipart, file_fields: &[&str]) -> Result<UploadForm, ApiError> {
    let mut file: Option<(String, Bytes)> = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if file.is_none() && file_fields.contains(&field_name.as_str()) {
            let filename = field.file_name().unwrap_or("").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;
            file = Some((filename, bytes));
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Invalid field {}: {}", field_name, e)))?;
            fields.insert(field_name, text);
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ApiError::BadRequest(format!("{} required", file_fields.join(" or "))))?;

    Ok(UploadForm { filename, bytes, fields })
}

/// Stores the file; unknown or unreadable formats are reported with
/// `supported: false`, never as an HTTP failure.
pub async fn upload_handler(
    State(document_service): State<Arc<DocumentService>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let form = read_form(multipart, &["file"]).await?;
    info!("Upload received: {} ({} bytes)", form.filename, form.bytes.len());

    let stored = document_service.process_upload(&form.filename, &form.bytes).await?;

    let chars = match &stored.extraction {
        Extraction::Text(text) => Some(text.chars().count()),
        Extraction::Unsupported => None,
    };

    Ok(Json(UploadResponse {
        file: stored.path.to_string_lossy().into_owned(),
        supported: chars.is_some(),
        format: stored.format.map(|f| f.as_str()),
        chars,
        extraction_error: stored.extraction_error,
    }))
}
