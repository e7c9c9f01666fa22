use anyhow::Result;
use axum::extract::FromRef;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{FirebaseVerifier, IdentityVerifier};
use crate::config::{LlmProvider, Settings};
use crate::services::{
    conversation::{ConversationManager, InMemoryConversationStore, ManagerOptions, StoreConfig},
    CompletionClient, DocumentService, LlmService, OfflineResponder, PdfExporter, UnconfiguredClient,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub conversation_manager: Arc<ConversationManager>,
    /// `None` when no identity credential is configured
    pub identity: Option<Arc<dyn IdentityVerifier>>,
    pub document_service: Arc<DocumentService>,
    pub pdf_exporter: Arc<PdfExporter>,
}

impl AppState {
    pub fn build(settings: Settings) -> Result<Self> {
        let completion = completion_client(&settings)?;

        let store = Arc::new(InMemoryConversationStore::new(StoreConfig::from_settings(
            &settings.conversation,
        )));
        let conversation_manager = Arc::new(ConversationManager::new(
            store,
            completion,
            ManagerOptions::from_settings(&settings),
        ));

        let identity: Option<Arc<dyn IdentityVerifier>> = match settings.identity.credentials_json {
            Some(_) => Some(Arc::new(FirebaseVerifier::from_config(&settings.identity)?)),
            None => {
                warn!("Identity credentials not configured, /auth and protected routes will be unavailable");
                None
            }
        };

        let document_service = Arc::new(DocumentService::new(settings.upload_dir()));
        let pdf_exporter = Arc::new(PdfExporter::new(settings.export_dir()));

        Ok(Self {
            settings: Arc::new(settings),
            conversation_manager,
            identity,
            document_service,
            pdf_exporter,
        })
    }
}

fn completion_client(settings: &Settings) -> Result<Arc<dyn CompletionClient>> {
    let client: Arc<dyn CompletionClient> = match (settings.llm.provider, &settings.llm.api_key) {
        (LlmProvider::Offline, _) => Arc::new(OfflineResponder::new()),
        (LlmProvider::OpenAi, Some(_)) => Arc::new(LlmService::new(settings.llm.clone())?),
        (LlmProvider::OpenAi, None) => {
            warn!("LLM credential not configured, chat requests will fail with COMPLETION_NOT_CONFIGURED");
            Arc::new(UnconfiguredClient)
        }
    };
    info!("Completion provider: {}", client.name());
    Ok(client)
}

impl FromRef<AppState> for Arc<ConversationManager> {
    fn from_ref(state: &AppState) -> Self {
        state.conversation_manager.clone()
    }
}

impl FromRef<AppState> for Arc<DocumentService> {
    fn from_ref(state: &AppState) -> Self {
        state.document_service.clone()
    }
}

impl FromRef<AppState> for Arc<PdfExporter> {
    fn from_ref(state: &AppState) -> Self {
        state.pdf_exporter.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Offline provider, no identity, uploads and exports under `dir`.
    pub(crate) fn test_settings(dir: &std::path::Path) -> Settings {
        let mut settings = Settings::defaults().unwrap();
        settings.llm.provider = LlmProvider::Offline;
        settings.identity.required = false;
        settings.documents.upload_dir = dir.join("uploads").to_string_lossy().into_owned();
        settings.documents.export_dir = dir.join("exports").to_string_lossy().into_owned();
        settings
    }

    #[test]
    fn test_build_offline_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::build(test_settings(dir.path())).unwrap();

        assert_eq!(state.conversation_manager.completion().name(), "offline");
        assert!(state.identity.is_none());
        assert!(state.document_service.upload_dir().ends_with("uploads"));
    }

    #[test]
    fn test_missing_key_uses_unconfigured_client() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.llm.provider = LlmProvider::OpenAi;
        settings.llm.required = false;

        let state = AppState::build(settings).unwrap();
        assert_eq!(state.conversation_manager.completion().name(), "unconfigured");
    }

    #[test]
    fn test_invalid_identity_credentials_fail_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.identity.credentials_json = Some("not json".to_string());

        assert!(AppState::build(settings).is_err());
    }
}
