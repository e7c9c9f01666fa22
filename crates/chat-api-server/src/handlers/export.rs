use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::services::PdfExporter;
use crate::utils::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub file: String,
}

pub async fn export_pdf_handler(
    State(exporter): State<Arc<PdfExporter>>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<FileResponse>, ApiError> {
    let path = exporter.export(&query.text).await?;
    Ok(Json(FileResponse {
        file: path.to_string_lossy().into_owned(),
    }))
}
