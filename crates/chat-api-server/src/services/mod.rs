pub mod completion;
pub mod conversation;
pub mod document_service;
pub mod llm_service;
pub mod offline_responder;
pub mod pdf_export;

pub use completion::{CompletionClient, CompletionError, UnconfiguredClient};
pub use document_service::{DocumentService, StoredUpload};
pub use llm_service::LlmService;
pub use offline_responder::OfflineResponder;
pub use pdf_export::PdfExporter;
